use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/* ====== Quality labels ======
   Fixed set of lowercase labels plus the exact "4K" sentinel. */

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "360p")]
    Q360,
    #[serde(rename = "480p")]
    Q480,
    #[serde(rename = "720p")]
    Q720,
    #[serde(rename = "1080p")]
    Q1080,
    #[serde(rename = "1440p")]
    Q1440,
    #[serde(rename = "2160p")]
    Q2160,
    #[serde(rename = "4K")]
    FourK,
}

impl Quality {
    pub const ALL: [Quality; 7] = [
        Quality::Q360,
        Quality::Q480,
        Quality::Q720,
        Quality::Q1080,
        Quality::Q1440,
        Quality::Q2160,
        Quality::FourK,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Quality::Q360 => "360p",
            Quality::Q480 => "480p",
            Quality::Q720 => "720p",
            Quality::Q1080 => "1080p",
            Quality::Q1440 => "1440p",
            Quality::Q2160 => "2160p",
            Quality::FourK => "4K",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown quality label: {0}")]
pub struct UnknownQuality(pub String);

impl FromStr for Quality {
    type Err = UnknownQuality;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "360p" => Ok(Quality::Q360),
            "480p" => Ok(Quality::Q480),
            "720p" => Ok(Quality::Q720),
            "1080p" => Ok(Quality::Q1080),
            "1440p" => Ok(Quality::Q1440),
            "2160p" => Ok(Quality::Q2160),
            "4k" => Ok(Quality::FourK),
            other => Err(UnknownQuality(other.to_string())),
        }
    }
}

/* ====== Movie records ====== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub file_id: String,
    /// Human-readable size label ("1.2 GB"); empty when unknown.
    #[serde(default)]
    pub size: String,
}

pub type QualityMap = BTreeMap<Quality, FileEntry>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub code: String,
    pub title: String,
    #[serde(flatten)]
    pub files: Files,
}

/// A movie is either flat (one part, one quality map) or split into parts,
/// each with its own quality map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum Files {
    Flat { qualities: QualityMap },
    MultiPart { parts: u32, parts_data: BTreeMap<u32, QualityMap> },
}

impl Movie {
    pub fn new_flat(code: String, title: String) -> Self {
        Self {
            code,
            title,
            files: Files::Flat { qualities: QualityMap::new() },
        }
    }

    pub fn parts(&self) -> u32 {
        match &self.files {
            Files::Flat { .. } => 1,
            Files::MultiPart { parts, .. } => *parts,
        }
    }

    /// Quality map for one part. A part with nothing recorded yields an empty
    /// map (meaning "unavailable"), never an error.
    pub fn qualities_for_part(&self, part: u32) -> QualityMap {
        match &self.files {
            Files::Flat { qualities } if part == 1 => qualities.clone(),
            Files::Flat { .. } => QualityMap::new(),
            Files::MultiPart { parts_data, .. } => {
                parts_data.get(&part).cloned().unwrap_or_default()
            }
        }
    }

    pub fn file_for(&self, part: u32, quality: Quality) -> Option<FileEntry> {
        match &self.files {
            Files::Flat { qualities } if part == 1 => qualities.get(&quality).cloned(),
            Files::Flat { .. } => None,
            Files::MultiPart { parts_data, .. } => {
                parts_data.get(&part).and_then(|q| q.get(&quality)).cloned()
            }
        }
    }

    pub fn size_label(&self, part: u32, quality: Quality) -> String {
        self.file_for(part, quality).map(|f| f.size).unwrap_or_default()
    }

    pub fn add_quality(&mut self, quality: Quality, entry: FileEntry) {
        match &mut self.files {
            Files::Flat { qualities } => {
                qualities.insert(quality, entry);
            }
            // On a multi-part movie a bare quality goes to part 1.
            Files::MultiPart { parts_data, .. } => {
                parts_data.entry(1).or_default().insert(quality, entry);
            }
        }
    }

    /// Records a file for one part, converting a flat movie to multi-part on
    /// the first call (existing flat qualities move to part 1).
    pub fn add_part_quality(&mut self, part: u32, quality: Quality, entry: FileEntry) {
        if let Files::Flat { qualities } = &self.files {
            let mut parts_data = BTreeMap::new();
            if !qualities.is_empty() {
                parts_data.insert(1, qualities.clone());
            }
            self.files = Files::MultiPart { parts: 1, parts_data };
        }
        if let Files::MultiPart { parts, parts_data } = &mut self.files {
            parts_data.entry(part).or_default().insert(quality, entry);
            *parts = (*parts).max(part);
        }
    }

    pub fn remove_quality(&mut self, part: u32, quality: Quality) -> bool {
        match &mut self.files {
            Files::Flat { qualities } if part == 1 => qualities.remove(&quality).is_some(),
            Files::Flat { .. } => false,
            Files::MultiPart { parts_data, .. } => match parts_data.get_mut(&part) {
                Some(q) => {
                    let removed = q.remove(&quality).is_some();
                    if q.is_empty() {
                        parts_data.remove(&part);
                    }
                    removed
                }
                None => false,
            },
        }
    }

    pub fn file_count(&self) -> usize {
        match &self.files {
            Files::Flat { qualities } => qualities.len(),
            Files::MultiPart { parts_data, .. } => parts_data.values().map(|q| q.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.file_count() == 0
    }

    /// One-line quality summary for list views: "720p (1.2 GB), 1080p".
    pub fn quality_summary(&self, part: u32) -> String {
        let qualities = self.qualities_for_part(part);
        qualities
            .iter()
            .map(|(q, f)| {
                if f.size.is_empty() {
                    q.to_string()
                } else {
                    format!("{} ({})", q, f.size)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/* ====== Title normalization ====== */

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lowercase, collapse runs of anything non-alphanumeric to one space, trim.
pub fn normalize(s: &str) -> String {
    let lowered = s.to_lowercase();
    NON_ALNUM.replace_all(&lowered, " ").trim().to_string()
}

/// Catalog code for a title: normalized with underscores ("Dune 2021" -> "dune_2021").
pub fn slug(title: &str) -> String {
    normalize(title).replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(size: &str) -> FileEntry {
        FileEntry { file_id: "BAAD_file".into(), size: size.into() }
    }

    #[test]
    fn quality_parsing_is_case_insensitive() {
        assert_eq!("720P".parse::<Quality>().unwrap(), Quality::Q720);
        assert_eq!("4k".parse::<Quality>().unwrap(), Quality::FourK);
        assert_eq!(Quality::FourK.to_string(), "4K");
        assert!("729p".parse::<Quality>().is_err());
    }

    #[test]
    fn slug_normalizes_title() {
        assert_eq!(slug("Dune 2021"), "dune_2021");
        assert_eq!(slug("  Kill Bill: Vol. 1 "), "kill_bill_vol_1");
        assert_eq!(normalize("DUNE: Part Two"), "dune part two");
    }

    #[test]
    fn flat_movie_resolves_part_one_only() {
        let mut m = Movie::new_flat("dune_2021".into(), "Dune 2021".into());
        m.add_quality(Quality::Q720, entry("1.2 GB"));
        assert_eq!(m.parts(), 1);
        assert_eq!(m.qualities_for_part(1).len(), 1);
        assert!(m.qualities_for_part(2).is_empty());
        assert!(m.file_for(1, Quality::Q720).is_some());
        assert!(m.file_for(1, Quality::Q1080).is_none());
    }

    #[test]
    fn missing_part_yields_empty_map() {
        let mut m = Movie::new_flat("kill_bill".into(), "Kill Bill".into());
        m.add_part_quality(2, Quality::Q1080, entry(""));
        assert_eq!(m.parts(), 2);
        assert!(m.qualities_for_part(1).is_empty());
        assert!(m.qualities_for_part(3).is_empty());
        assert_eq!(m.qualities_for_part(2).len(), 1);
    }

    #[test]
    fn adding_a_part_migrates_flat_qualities() {
        let mut m = Movie::new_flat("kill_bill".into(), "Kill Bill".into());
        m.add_quality(Quality::Q720, entry("700 MB"));
        m.add_part_quality(2, Quality::Q720, entry("650 MB"));
        assert_eq!(m.parts(), 2);
        assert_eq!(m.qualities_for_part(1).len(), 1);
        assert_eq!(m.qualities_for_part(2).len(), 1);
        assert_eq!(m.file_count(), 2);
    }

    #[test]
    fn removing_last_quality_empties_movie() {
        let mut m = Movie::new_flat("dune_2021".into(), "Dune 2021".into());
        m.add_quality(Quality::Q720, entry("1.2 GB"));
        assert!(m.remove_quality(1, Quality::Q720));
        assert!(!m.remove_quality(1, Quality::Q720));
        assert!(m.is_empty());
    }

    #[test]
    fn movie_survives_json_round_trip() {
        let mut m = Movie::new_flat("dune_2021".into(), "Dune 2021".into());
        m.add_quality(Quality::FourK, entry("8.1 GB"));
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"4K\""));
        let back: Movie = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
