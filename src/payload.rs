//! Wire shapes arriving from the chat transport: inline-keyboard callback
//! data and `/start` deep-link payloads. Malformed input parses to `None`
//! and is handled as "not found" upstream, never as an error.

use crate::catalog::Quality;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/* ====== Callback data ======
   movie:<code>
   part:<code>:<n>
   quality:<code>:<part>:<label>
   backq:<code>:<part> */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Movie { code: String },
    Part { code: String, part: u32 },
    Quality { code: String, part: u32, quality: Quality },
    BackToQualities { code: String, part: u32 },
}

impl Callback {
    pub fn parse(data: &str) -> Option<Self> {
        let mut fields = data.split(':');
        let kind = fields.next()?;
        let parsed = match kind {
            "movie" => Callback::Movie { code: nonempty(fields.next()?)? },
            "part" => Callback::Part {
                code: nonempty(fields.next()?)?,
                part: fields.next()?.parse().ok()?,
            },
            "quality" => Callback::Quality {
                code: nonempty(fields.next()?)?,
                part: fields.next()?.parse().ok()?,
                quality: fields.next()?.parse().ok()?,
            },
            "backq" => Callback::BackToQualities {
                code: nonempty(fields.next()?)?,
                part: fields.next()?.parse().ok()?,
            },
            _ => return None,
        };
        // trailing fields make the shape invalid
        if fields.next().is_some() {
            return None;
        }
        Some(parsed)
    }

    pub fn encode(&self) -> String {
        match self {
            Callback::Movie { code } => format!("movie:{code}"),
            Callback::Part { code, part } => format!("part:{code}:{part}"),
            Callback::Quality { code, part, quality } => {
                format!("quality:{code}:{part}:{quality}")
            }
            Callback::BackToQualities { code, part } => format!("backq:{code}:{part}"),
        }
    }
}

fn nonempty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/* ====== /start payloads ======
   token_<token>, or legacy url-safe base64 of code[:part[:quality[:token]]] */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPayload {
    Token(String),
    Legacy {
        code: String,
        part: u32,
        quality: Option<Quality>,
        token: Option<String>,
    },
}

impl StartPayload {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(token) = raw.strip_prefix("token_") {
            return nonempty(token).map(StartPayload::Token);
        }
        decode_legacy(raw)
    }
}

/// Deep-link payload for a movie card button; part/quality/token are appended
/// only when present.
pub fn encode_legacy(
    code: &str,
    part: u32,
    quality: Option<Quality>,
    token: Option<&str>,
) -> String {
    let mut plain = format!("{code}:{part}");
    if let Some(q) = quality {
        plain.push(':');
        plain.push_str(q.label());
        if let Some(t) = token {
            plain.push(':');
            plain.push_str(t);
        }
    }
    URL_SAFE_NO_PAD.encode(plain)
}

fn decode_legacy(raw: &str) -> Option<StartPayload> {
    let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
    let plain = String::from_utf8(bytes).ok()?;
    let mut fields = plain.splitn(4, ':');

    let code = nonempty(fields.next()?)?;
    let part = match fields.next() {
        Some(p) => p.parse().ok()?,
        None => 1,
    };
    let quality = match fields.next() {
        Some(q) => Some(q.parse().ok()?),
        None => None,
    };
    let token = fields.next().and_then(nonempty);
    Some(StartPayload::Legacy { code, part, quality, token })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_callback_shapes() {
        assert_eq!(
            Callback::parse("movie:dune_2021"),
            Some(Callback::Movie { code: "dune_2021".into() })
        );
        assert_eq!(
            Callback::parse("part:kill_bill:2"),
            Some(Callback::Part { code: "kill_bill".into(), part: 2 })
        );
        assert_eq!(
            Callback::parse("quality:dune_2021:1:720p"),
            Some(Callback::Quality {
                code: "dune_2021".into(),
                part: 1,
                quality: Quality::Q720,
            })
        );
        assert_eq!(
            Callback::parse("backq:dune_2021:1"),
            Some(Callback::BackToQualities { code: "dune_2021".into(), part: 1 })
        );
    }

    #[test]
    fn rejects_malformed_callbacks() {
        for bad in [
            "",
            "movie:",
            "movie",
            "part:dune_2021",
            "part:dune_2021:x",
            "quality:dune_2021:1",
            "quality:dune_2021:1:999p",
            "movie:dune_2021:extra",
            "vote:dune_2021",
        ] {
            assert_eq!(Callback::parse(bad), None, "accepted {bad:?}");
        }
    }

    #[test]
    fn callback_encode_round_trips() {
        let cb = Callback::Quality {
            code: "dune_2021".into(),
            part: 2,
            quality: Quality::FourK,
        };
        assert_eq!(Callback::parse(&cb.encode()), Some(cb));
    }

    #[test]
    fn token_payload_strips_prefix() {
        assert_eq!(
            StartPayload::parse("token_abc123"),
            Some(StartPayload::Token("abc123".into()))
        );
        assert_eq!(StartPayload::parse("token_"), None);
    }

    #[test]
    fn legacy_payload_round_trips() {
        let raw = encode_legacy("dune_2021", 2, Some(Quality::Q1080), Some("tok9"));
        assert_eq!(
            StartPayload::parse(&raw),
            Some(StartPayload::Legacy {
                code: "dune_2021".into(),
                part: 2,
                quality: Some(Quality::Q1080),
                token: Some("tok9".into()),
            })
        );

        let raw = encode_legacy("dune_2021", 1, None, None);
        assert_eq!(
            StartPayload::parse(&raw),
            Some(StartPayload::Legacy {
                code: "dune_2021".into(),
                part: 1,
                quality: None,
                token: None,
            })
        );
    }

    #[test]
    fn garbage_payload_is_none() {
        assert_eq!(StartPayload::parse("%%% not base64 %%%"), None);
        // valid base64 of an empty code
        let raw = URL_SAFE_NO_PAD.encode(":1:720p");
        assert_eq!(StartPayload::parse(&raw), None);
    }
}
