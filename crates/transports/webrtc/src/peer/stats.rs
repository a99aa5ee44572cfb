//! Selected candidate pair lookup
//!
//! The route classification (`lan`, `stun`, `turn-<proto>`) is derived from
//! the local candidate of the nominated pair in the connection's stats.

use peerlink_core::transport::{CandidateType, SelectedPath};
use std::collections::HashMap;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

/// Local candidate as seen in a stats report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCandidateInfo {
    /// `host`, `srflx`, `prflx` or `relay`
    pub candidate_type: String,
    /// Transport to the TURN server; empty for non-relay candidates
    pub relay_protocol: String,
}

/// Local side of the nominated pair, if the engine reports one
pub async fn selected_path(peer_connection: &RTCPeerConnection) -> Option<SelectedPath> {
    let report = peer_connection.get_stats().await;

    let mut nominated = None;
    let mut locals = HashMap::new();
    for stat in report.reports.values() {
        match stat {
            StatsReportType::CandidatePair(pair) if pair.nominated => {
                nominated = Some(pair.local_candidate_id.clone());
            }
            StatsReportType::LocalCandidate(candidate) => {
                locals.insert(
                    candidate.id.clone(),
                    LocalCandidateInfo {
                        candidate_type: candidate.candidate_type.to_string(),
                        relay_protocol: candidate.relay_protocol.clone(),
                    },
                );
            }
            _ => {}
        }
    }

    resolve(nominated.as_deref(), &locals)
}

/// Map the nominated pair's local candidate id to a [`SelectedPath`]
pub fn resolve(
    nominated_local_id: Option<&str>,
    locals: &HashMap<String, LocalCandidateInfo>,
) -> Option<SelectedPath> {
    let local = locals.get(nominated_local_id?)?;
    let candidate_type = CandidateType::from_sdp_name(&local.candidate_type);
    let relay_protocol = match candidate_type {
        CandidateType::Relay if !local.relay_protocol.trim().is_empty() => {
            Some(local.relay_protocol.trim().to_ascii_lowercase())
        }
        _ => None,
    };
    Some(SelectedPath {
        candidate_type,
        relay_protocol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locals(entries: &[(&str, &str, &str)]) -> HashMap<String, LocalCandidateInfo> {
        entries
            .iter()
            .map(|(id, kind, proto)| {
                (
                    id.to_string(),
                    LocalCandidateInfo {
                        candidate_type: kind.to_string(),
                        relay_protocol: proto.to_string(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_host_pair() {
        let locals = locals(&[("a", "host", ""), ("b", "srflx", "")]);
        let path = resolve(Some("a"), &locals).unwrap();
        assert_eq!(path.candidate_type, CandidateType::Host);
        assert_eq!(path.relay_protocol, None);
    }

    #[test]
    fn test_relay_pair_keeps_protocol() {
        let locals = locals(&[("r", "relay", "TCP")]);
        let path = resolve(Some("r"), &locals).unwrap();
        assert_eq!(path, SelectedPath::relayed("tcp"));
    }

    #[test]
    fn test_relay_without_protocol() {
        let locals = locals(&[("r", "relay", "")]);
        let path = resolve(Some("r"), &locals).unwrap();
        assert_eq!(path.candidate_type, CandidateType::Relay);
        assert_eq!(path.relay_protocol, None);
    }

    #[test]
    fn test_no_nominated_pair() {
        let locals = locals(&[("a", "host", "")]);
        assert!(resolve(None, &locals).is_none());
        assert!(resolve(Some("missing"), &locals).is_none());
    }
}
