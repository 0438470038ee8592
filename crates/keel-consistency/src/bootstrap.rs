//! Bootstrap eligibility
//!
//! A node may found a new cluster only while it is "lone": its peer registry
//! is empty or lists nothing but its own address. A single entry for some
//! other address means the node was pointed at a cluster to join, even if
//! that peer has not answered yet.
//!
//! The check cannot tell a node that never had peers from one whose peers all
//! left except itself; both are reported as lone.

use tracing::debug;

use crate::error::ConsensusError;
use crate::peers::PeerStore;

/// Whether the local node is the sole (or only self-registered) member.
///
/// Read-only and safe to call repeatedly. A registry read failure is
/// returned to the caller, who decides how to treat it.
pub fn is_lone_node(peers: &dyn PeerStore, local_addr: &str) -> Result<bool, ConsensusError> {
    let peers = peers.peers().map_err(ConsensusError::RegistryRead)?;

    let lone = match peers.as_slice() {
        [] => true,
        [only] => only == local_addr,
        _ => false,
    };

    debug!(peers = peers.len(), local_addr, lone, "Checked lone node");
    Ok(lone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::peers::StaticPeers;
    use proptest::prelude::*;

    const LOCAL: &str = "10.0.0.1:9000";

    struct BrokenPeers;

    impl PeerStore for BrokenPeers {
        fn peers(&self) -> Result<Vec<String>, StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }

        fn set_peers(&self, _peers: &[String]) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn lone(peers: Vec<String>) -> bool {
        is_lone_node(&StaticPeers::new(peers), LOCAL).unwrap()
    }

    #[test]
    fn test_no_peers_is_lone() {
        assert!(lone(vec![]));
    }

    #[test]
    fn test_only_self_is_lone() {
        assert!(lone(vec![LOCAL.to_string()]));
    }

    #[test]
    fn test_single_remote_peer_is_not_lone() {
        assert!(!lone(vec!["10.0.0.2:9000".to_string()]));
    }

    #[test]
    fn test_self_among_others_is_not_lone() {
        assert!(!lone(vec![LOCAL.to_string(), "10.0.0.2:9000".to_string()]));
    }

    #[test]
    fn test_address_must_match_exactly() {
        assert!(!lone(vec!["10.0.0.1:9001".to_string()]));
        assert!(!lone(vec!["localhost:9000".to_string()]));
    }

    #[test]
    fn test_registry_failure_propagates() {
        let err = is_lone_node(&BrokenPeers, LOCAL).unwrap_err();
        assert!(matches!(err, ConsensusError::RegistryRead(_)));
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_repeated_calls_agree() {
        let peers = StaticPeers::new(vec![LOCAL.to_string()]);
        for _ in 0..3 {
            assert!(is_lone_node(&peers, LOCAL).unwrap());
        }
        assert_eq!(peers.peers().unwrap(), vec![LOCAL.to_string()]);
    }

    #[test]
    fn test_consistent_while_registry_is_rewritten() {
        use crate::peers::JsonPeerStore;
        use std::sync::atomic::{AtomicBool, Ordering};

        let tmp_dir = tempfile::TempDir::new().unwrap();
        let store = JsonPeerStore::new(tmp_dir.path());
        let alone = vec![LOCAL.to_string()];
        let joined = vec![LOCAL.to_string(), "10.0.0.2:9000".to_string()];
        store.set_peers(&alone).unwrap();

        let done = AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..500 {
                    let peers = if i % 2 == 0 { &joined } else { &alone };
                    store.set_peers(peers).unwrap();
                }
                done.store(true, Ordering::SeqCst);
            });

            let mut checks = 0;
            while !done.load(Ordering::SeqCst) || checks < 100 {
                if let Err(e) = is_lone_node(&store, LOCAL) {
                    panic!("lone check failed during rewrite: {}", e);
                }
                let peers = store.peers().unwrap();
                assert!(peers == alone || peers == joined, "torn read: {:?}", peers);
                checks += 1;
            }
        });

        // Writer finished on the single-member list
        assert!(is_lone_node(&store, LOCAL).unwrap());
    }

    proptest! {
        #[test]
        fn prop_single_peer_lone_iff_self(addr in "[a-z0-9.]{1,12}:[0-9]{1,5}") {
            let expected = addr == LOCAL;
            prop_assert_eq!(lone(vec![addr]), expected);
        }

        #[test]
        fn prop_two_or_more_peers_never_lone(
            mut others in proptest::collection::hash_set("[a-z0-9.]{1,12}:[0-9]{1,5}", 2..8),
            include_self in any::<bool>(),
        ) {
            if include_self {
                others.insert(LOCAL.to_string());
            }
            let peers: Vec<String> = others.into_iter().collect();
            prop_assert!(!lone(peers));
        }
    }
}
