//! NAT traversal fix-up (component C8, spec §4.8).
//!
//! When a Query/Data message has crossed a NAT, the MRI addresses no
//! longer match the packet's observed source address. The node that
//! detects the mismatch rewrites the MRI to the observed (post-NAT)
//! address/port and attaches a NAT-Traversal object carrying the original
//! MRI, so the far end can still reconstruct the pre-NAT flow identity.

use std::net::IpAddr;

use crate::wire::mri::LooseEndMri;
use crate::wire::objects::NatTraversal;
use crate::wire::Mri;

/// Compares the MRI's source address against the packet's observed
/// source address and returns a rewritten MRI plus the NAT-Traversal
/// object to attach, if (and only if) they disagree.
pub fn detect_and_fixup(mri: &Mri, observed_src: IpAddr, observed_src_port: u16) -> Option<(Mri, NatTraversal)> {
    match mri {
        Mri::PathCoupled(pc) if pc.src_addr != observed_src || pc.src_port != observed_src_port => {
            let mut rewritten = pc.clone();
            rewritten.src_addr = observed_src;
            rewritten.src_port = observed_src_port;
            rewritten.nat_traversed = true;
            let nat_count = if pc.nat_traversed { 2 } else { 1 };
            Some((Mri::PathCoupled(rewritten), NatTraversal { nat_count, original_mri: mri.clone() }))
        }
        Mri::LooseEnd(le) if le.src_addr != observed_src => {
            let rewritten = LooseEndMri {
                src_addr: observed_src,
                dst_addr: le.dst_addr,
                direction: le.direction,
                nat_traversed: true,
            };
            let nat_count = if le.nat_traversed { 2 } else { 1 };
            Some((Mri::LooseEnd(rewritten), NatTraversal { nat_count, original_mri: mri.clone() }))
        }
        _ => None,
    }
}

/// Applies a received NAT-Traversal object by substituting its carried
/// original MRI back in, the inverse of [`detect_and_fixup`], for a node
/// on the far side of the translation that needs the pre-NAT identity.
pub fn recover_original(nat: &NatTraversal) -> Mri {
    nat.original_mri.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::mri::{Direction, PathCoupledMri};

    fn sample() -> Mri {
        Mri::PathCoupled(PathCoupledMri {
            src_addr: "10.0.0.1".parse().unwrap(),
            dst_addr: "10.0.0.2".parse().unwrap(),
            src_prefix: 32,
            dst_prefix: 32,
            protocol: 17,
            ds_field: 0,
            flow_label: 0,
            spi: 0,
            src_port: 5000,
            dst_port: 6000,
            direction: Direction::Downstream,
            nat_traversed: false,
        })
    }

    #[test]
    fn mismatched_source_triggers_fixup() {
        let mri = sample();
        let (rewritten, nat) = detect_and_fixup(&mri, "203.0.113.9".parse().unwrap(), 40000).unwrap();
        match rewritten {
            Mri::PathCoupled(pc) => {
                assert_eq!(pc.src_addr, "203.0.113.9".parse::<IpAddr>().unwrap());
                assert_eq!(pc.src_port, 40000);
                assert!(pc.nat_traversed);
            }
            _ => panic!("expected PathCoupled"),
        }
        assert_eq!(nat.nat_count, 1);
        assert_eq!(recover_original(&nat), mri);
    }

    #[test]
    fn matching_source_is_a_no_op() {
        let mri = sample();
        assert!(detect_and_fixup(&mri, "10.0.0.1".parse().unwrap(), 5000).is_none());
    }

    #[test]
    fn double_translation_increments_nat_count() {
        let mri = sample();
        let (once, _) = detect_and_fixup(&mri, "203.0.113.9".parse().unwrap(), 40000).unwrap();
        let (_, nat) = detect_and_fixup(&once, "198.51.100.5".parse().unwrap(), 50000).unwrap();
        assert_eq!(nat.nat_count, 2);
    }
}
