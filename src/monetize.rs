use crate::catalog::Quality;

/// Static monetization policy, threaded into link generation (no module state).
#[derive(Debug, Clone)]
pub struct MonetizeConfig {
    pub enabled: bool,
    /// Ad page base URL, e.g. "https://adspage.example.com".
    pub ad_page_url: String,
}

impl MonetizeConfig {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.ad_page_url.is_empty()
    }
}

/// Display metadata embedded into the ad page query string.
#[derive(Debug, Clone)]
pub struct LinkMeta<'a> {
    pub title: &'a str,
    pub part: u32,
    pub quality: Quality,
    pub size: &'a str,
}

/// Bot deep link that redeems a token: `https://t.me/<bot>?start=token_<token>`.
pub fn start_link(bot_username: &str, token: &str) -> String {
    format!("https://t.me/{bot_username}?start=token_{token}")
}

/// Link the user clicks to get the file. With monetization active this is the
/// ad page carrying the token and display fields (percent-encoded, empty
/// fields omitted) plus the deep link as `callback`; otherwise the deep link
/// itself.
pub fn download_link(
    cfg: &MonetizeConfig,
    bot_username: &str,
    token: &str,
    meta: &LinkMeta<'_>,
) -> String {
    let callback = start_link(bot_username, token);
    if !cfg.is_active() {
        return callback;
    }

    let part = meta.part.to_string();
    let quality = meta.quality.to_string();
    let params: [(&str, &str); 6] = [
        ("token", token),
        ("movie", meta.title),
        ("part", &part),
        ("quality", &quality),
        ("size", meta.size),
        ("callback", &callback),
    ];
    let query = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", cfg.ad_page_url.trim_end_matches('/'), query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(enabled: bool) -> MonetizeConfig {
        MonetizeConfig {
            enabled,
            ad_page_url: "https://adspage.example.com".into(),
        }
    }

    fn meta() -> LinkMeta<'static> {
        LinkMeta {
            title: "Dune 2021",
            part: 1,
            quality: Quality::Q720,
            size: "1.2 GB",
        }
    }

    #[test]
    fn disabled_links_straight_to_bot() {
        let link = download_link(&cfg(false), "FilmGateBot", "abc123", &meta());
        assert_eq!(link, "https://t.me/FilmGateBot?start=token_abc123");
        assert!(!link.contains("adspage.example.com"));
    }

    #[test]
    fn empty_ad_url_counts_as_disabled() {
        let cfg = MonetizeConfig { enabled: true, ad_page_url: String::new() };
        let link = download_link(&cfg, "FilmGateBot", "abc123", &meta());
        assert_eq!(link, "https://t.me/FilmGateBot?start=token_abc123");
    }

    #[test]
    fn enabled_embeds_encoded_fields_and_callback() {
        let link = download_link(&cfg(true), "FilmGateBot", "abc123", &meta());
        assert!(link.starts_with("https://adspage.example.com?"));
        assert!(link.contains("token=abc123"));
        assert!(link.contains("movie=Dune%202021"));
        assert!(link.contains("part=1"));
        assert!(link.contains("quality=720p"));
        assert!(link.contains("size=1.2%20GB"));
        assert!(link.contains(
            "callback=https%3A%2F%2Ft.me%2FFilmGateBot%3Fstart%3Dtoken_abc123"
        ));
    }

    #[test]
    fn empty_size_is_omitted() {
        let mut m = meta();
        m.size = "";
        let link = download_link(&cfg(true), "FilmGateBot", "abc123", &m);
        assert!(!link.contains("size="));
        assert!(link.contains("token=abc123"));
    }
}
