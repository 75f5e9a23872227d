//! Meeting validation before storage.
//!
//! Rejects plainly corrupted records coming out of adapters - empty titles,
//! packet URLs that don't parse, wrong-scheme links - so one bad scrape
//! can't pollute the store. Rejection drops the single meeting and the sync
//! continues.

use crate::types::{FetchedMeeting, PacketUrl};

/// Why a meeting was rejected.
#[derive(Debug, PartialEq, Eq)]
pub enum ValidationError {
    EmptyTitle,
    BadPacketUrl(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyTitle => write!(f, "empty title"),
            ValidationError::BadPacketUrl(url) => write!(f, "bad packet url: {}", url),
        }
    }
}

fn check_url(url: &str) -> Result<(), ValidationError> {
    let parsed =
        url::Url::parse(url).map_err(|_| ValidationError::BadPacketUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        _ => return Err(ValidationError::BadPacketUrl(url.to_string())),
    }
    if parsed.host_str().unwrap_or("").is_empty() {
        return Err(ValidationError::BadPacketUrl(url.to_string()));
    }
    Ok(())
}

/// Validate a fetched meeting before it is written. Scope is URL sanity and
/// a non-empty title; a missing meeting id is not an error here because the
/// conductor fills it with the deterministic fallback hash.
pub fn validate_meeting(meeting: &FetchedMeeting) -> Result<(), ValidationError> {
    if meeting.title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }

    if let Some(packet) = meeting.packet_url() {
        match packet {
            PacketUrl::Single(url) => check_url(url)?,
            PacketUrl::Many(urls) => {
                if urls.is_empty() {
                    return Err(ValidationError::BadPacketUrl("empty url list".to_string()));
                }
                for url in urls {
                    check_url(url)?;
                }
            }
        }
    }

    if let Some(agenda_url) = meeting.agenda_url() {
        check_url(agenda_url)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgendaSource;

    fn meeting(title: &str, source: AgendaSource) -> FetchedMeeting {
        FetchedMeeting {
            meeting_id: "m-1".to_string(),
            title: title.to_string(),
            start: None,
            status: None,
            source,
            participation: None,
            location: None,
        }
    }

    #[test]
    fn test_valid_meeting_passes() {
        let m = meeting(
            "City Council",
            AgendaSource::Packet {
                packet_url: PacketUrl::Single("https://example.com/packet.pdf".into()),
            },
        );
        assert!(validate_meeting(&m).is_ok());
    }

    #[test]
    fn test_empty_title_rejected() {
        let m = meeting("   ", AgendaSource::None);
        assert_eq!(validate_meeting(&m), Err(ValidationError::EmptyTitle));
    }

    #[test]
    fn test_bad_packet_url_rejected() {
        let m = meeting(
            "City Council",
            AgendaSource::Packet {
                packet_url: PacketUrl::Single("not a url".into()),
            },
        );
        assert!(matches!(
            validate_meeting(&m),
            Err(ValidationError::BadPacketUrl(_))
        ));

        let m = meeting(
            "City Council",
            AgendaSource::Packet {
                packet_url: PacketUrl::Single("ftp://example.com/a.pdf".into()),
            },
        );
        assert!(matches!(
            validate_meeting(&m),
            Err(ValidationError::BadPacketUrl(_))
        ));
    }

    #[test]
    fn test_empty_url_list_rejected() {
        let m = meeting(
            "City Council",
            AgendaSource::Packet {
                packet_url: PacketUrl::Many(vec![]),
            },
        );
        assert!(matches!(
            validate_meeting(&m),
            Err(ValidationError::BadPacketUrl(_))
        ));
    }

    #[test]
    fn test_missing_meeting_id_is_not_rejected() {
        // The conductor backfills ids with the deterministic hash, so an
        // id-less record must survive validation to reach it
        let mut m = meeting("City Council", AgendaSource::None);
        m.meeting_id = "".to_string();
        assert!(validate_meeting(&m).is_ok());
    }

    #[test]
    fn test_meeting_without_urls_passes() {
        let m = meeting("Display-only meeting", AgendaSource::None);
        assert!(validate_meeting(&m).is_ok());
    }
}
