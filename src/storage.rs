use crate::catalog::{self, Movie, Quality};
use crate::gate::{GateError, TokenBinding, TokenRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: u64,
    pub username: Option<String>,
    pub first_seen: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FileState {
    version: u32,
    // code -> movie
    movies: HashMap<String, Movie>,
    // user_id -> record, for /stats and /broadcast
    users: HashMap<u64, UserRecord>,
    // token id -> record
    tokens: HashMap<String, TokenRecord>,
}

#[derive(Clone)]
pub struct Storage {
    inner: Arc<RwLock<FileState>>,
    path: PathBuf,
    token_ttl: Option<Duration>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Storage {
    pub async fn new(path: impl Into<PathBuf>, token_ttl: Option<Duration>) -> anyhow::Result<Self> {
        let path = path.into();
        let state = if fs::try_exists(&path).await.unwrap_or(false) {
            let data = fs::read(&path).await?;
            match serde_json::from_slice::<FileState>(&data) {
                Ok(mut s) => {
                    if s.version == 0 {
                        s.version = 1;
                    }
                    s
                }
                Err(_) => FileState { version: 1, ..Default::default() },
            }
        } else {
            FileState { version: 1, ..Default::default() }
        };
        Ok(Self { inner: Arc::new(RwLock::new(state)), path, token_ttl })
    }

    /* ====== Movies ====== */

    pub async fn get_movie(&self, code: &str) -> Option<Movie> {
        let guard = self.inner.read().await;
        guard.movies.get(code).cloned()
    }

    pub async fn upsert_movie(&self, movie: Movie) -> anyhow::Result<()> {
        {
            let mut guard = self.inner.write().await;
            guard.movies.insert(movie.code.clone(), movie);
        }
        self.flush().await
    }

    pub async fn delete_movie(&self, code: &str) -> anyhow::Result<bool> {
        let removed = {
            let mut guard = self.inner.write().await;
            guard.movies.remove(code).is_some()
        };
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }

    /// Substring match over normalized titles, sorted by title.
    pub async fn search_movies(&self, query: &str) -> Vec<Movie> {
        let needle = catalog::normalize(query);
        if needle.is_empty() {
            return Vec::new();
        }
        let guard = self.inner.read().await;
        let mut hits: Vec<Movie> = guard
            .movies
            .values()
            .filter(|m| catalog::normalize(&m.title).contains(&needle))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.title.cmp(&b.title));
        hits
    }

    pub async fn all_movies(&self) -> Vec<Movie> {
        let guard = self.inner.read().await;
        let mut movies: Vec<Movie> = guard.movies.values().cloned().collect();
        movies.sort_by(|a, b| a.title.cmp(&b.title));
        movies
    }

    /* ====== Users ====== */

    /// Returns true when the user was seen for the first time.
    pub async fn add_user(&self, user_id: u64, username: Option<&str>) -> anyhow::Result<bool> {
        let added = {
            let mut guard = self.inner.write().await;
            match guard.users.get_mut(&user_id) {
                Some(existing) => {
                    existing.username = username.map(str::to_string);
                    false
                }
                None => {
                    guard.users.insert(
                        user_id,
                        UserRecord {
                            user_id,
                            username: username.map(str::to_string),
                            first_seen: unix_now(),
                        },
                    );
                    true
                }
            }
        };
        if added {
            self.flush().await?;
        }
        Ok(added)
    }

    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    pub async fn all_user_ids(&self) -> Vec<u64> {
        self.inner.read().await.users.keys().copied().collect()
    }

    /* ====== Tokens ====== */

    pub async fn create_token(
        &self,
        user_id: u64,
        movie_code: &str,
        part: u32,
        quality: Quality,
    ) -> anyhow::Result<String> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        {
            let mut guard = self.inner.write().await;
            guard.tokens.insert(
                token.clone(),
                TokenRecord::issue(user_id, movie_code.to_string(), part, quality, unix_now()),
            );
        }
        self.flush().await?;
        Ok(token)
    }

    /// Atomic check-and-invalidate: the write guard serializes concurrent
    /// redemptions of the same token.
    pub async fn redeem_token(
        &self,
        token: &str,
        requesting_user: u64,
    ) -> anyhow::Result<Result<TokenBinding, GateError>> {
        let outcome = {
            let mut guard = self.inner.write().await;
            match guard.tokens.get_mut(token) {
                None => Err(GateError::NotFound),
                Some(record) => record.redeem(requesting_user, unix_now(), self.token_ttl),
            }
        };
        if outcome.is_ok() {
            self.flush().await?;
        }
        Ok(outcome)
    }

    /* ====== Persistence ====== */

    async fn flush(&self) -> anyhow::Result<()> {
        // snapshot under the read lock, write outside it
        let snapshot = {
            let guard = self.inner.read().await;
            serde_json::to_vec_pretty(&*guard)?
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &snapshot).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FileEntry;

    fn temp_store_path() -> PathBuf {
        std::env::temp_dir().join(format!("filmgate_test_{}.json", uuid::Uuid::new_v4().simple()))
    }

    async fn store() -> Storage {
        Storage::new(temp_store_path(), None).await.unwrap()
    }

    fn dune() -> Movie {
        let mut m = Movie::new_flat("dune_2021".into(), "Dune 2021".into());
        m.add_quality(
            Quality::Q720,
            FileEntry { file_id: "BAAD_dune".into(), size: "1.2 GB".into() },
        );
        m
    }

    #[tokio::test]
    async fn issue_and_redeem_once() {
        let s = store().await;
        s.upsert_movie(dune()).await.unwrap();

        let token = s.create_token(42, "dune_2021", 1, Quality::Q720).await.unwrap();
        let binding = s.redeem_token(&token, 42).await.unwrap().unwrap();
        assert_eq!(binding.movie_code, "dune_2021");
        assert_eq!(binding.part, 1);
        assert_eq!(binding.quality, Quality::Q720);

        assert_eq!(
            s.redeem_token(&token, 42).await.unwrap(),
            Err(GateError::AlreadyUsed)
        );
    }

    #[tokio::test]
    async fn redeem_by_other_user_is_refused_and_keeps_token() {
        let s = store().await;
        let token = s.create_token(42, "dune_2021", 1, Quality::Q720).await.unwrap();

        assert_eq!(
            s.redeem_token(&token, 7).await.unwrap(),
            Err(GateError::Unauthorized)
        );
        // still redeemable by the issuing user
        assert!(s.redeem_token(&token, 42).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let s = store().await;
        assert_eq!(
            s.redeem_token("no-such-token", 42).await.unwrap(),
            Err(GateError::NotFound)
        );
    }

    #[tokio::test]
    async fn concurrent_redemptions_only_one_wins() {
        let s = store().await;
        let token = s.create_token(42, "dune_2021", 1, Quality::Q720).await.unwrap();

        let (a, b) = tokio::join!(s.redeem_token(&token, 42), s.redeem_token(&token, 42));
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    }

    #[tokio::test]
    async fn expired_token_is_not_found() {
        let s = Storage::new(temp_store_path(), Some(Duration::from_secs(0)))
            .await
            .unwrap();
        let token = s.create_token(42, "dune_2021", 1, Quality::Q720).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(
            s.redeem_token(&token, 42).await.unwrap(),
            Err(GateError::NotFound)
        );
    }

    #[tokio::test]
    async fn search_matches_both_dunes() {
        let s = store().await;
        s.upsert_movie(dune()).await.unwrap();
        s.upsert_movie(Movie::new_flat("dune_part_two".into(), "Dune Part Two".into()))
            .await
            .unwrap();
        s.upsert_movie(Movie::new_flat("kill_bill".into(), "Kill Bill".into()))
            .await
            .unwrap();

        let hits = s.search_movies("dune").await;
        let codes: Vec<&str> = hits.iter().map(|m| m.code.as_str()).collect();
        assert_eq!(codes, vec!["dune_2021", "dune_part_two"]);
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let path = temp_store_path();
        {
            let s = Storage::new(&path, None).await.unwrap();
            s.upsert_movie(dune()).await.unwrap();
            s.add_user(42, Some("dave")).await.unwrap();
        }
        let s = Storage::new(&path, None).await.unwrap();
        assert!(s.get_movie("dune_2021").await.is_some());
        assert_eq!(s.user_count().await, 1);
    }

    #[tokio::test]
    async fn delete_movie_reports_presence() {
        let s = store().await;
        s.upsert_movie(dune()).await.unwrap();
        assert!(s.delete_movie("dune_2021").await.unwrap());
        assert!(!s.delete_movie("dune_2021").await.unwrap());
        assert!(s.get_movie("dune_2021").await.is_none());
    }
}
