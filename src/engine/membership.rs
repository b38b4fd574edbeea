//! Consensus membership string parsing.
//!
//! The engine reports its membership as `addr#weight;addr#weight@epoch`,
//! e.g. `10.0.0.1:13306#1;10.0.0.2:13306#1@1000`.  Members are correlated
//! with roster entries through an exact host match: either the address's
//! leading host label equals the member name, or the host equals the
//! member's store-reported address.

use crate::dcs::{Cluster, Member};

/// Addresses in a membership string, in engine order.  Tokens without a
/// port separator are dropped.
pub fn parse_member_addrs(cluster_info: &str) -> Vec<String> {
    let members = cluster_info.split('@').next().unwrap_or_default();
    members
        .split(';')
        .filter(|token| token.contains(':'))
        .map(|token| token.split('#').next().unwrap_or_default().trim().to_string())
        .collect()
}

/// `pod-0.svc.ns:13306` -> `pod-0.svc.ns`
pub fn host(addr: &str) -> &str {
    addr.rsplit_once(':').map(|(h, _)| h).unwrap_or(addr)
}

/// `pod-0.svc.ns:13306` -> `pod-0`
pub fn host_label(addr: &str) -> &str {
    host(addr).split('.').next().unwrap_or_default()
}

/// Whether `addr` designates `member`.
pub fn addr_matches_member(addr: &str, member: &Member) -> bool {
    host_label(addr) == member.name || (!member.address.is_empty() && host(addr) == member.address)
}

/// Address of the member called `name` among `addrs`.  Members missing
/// from the roster are matched by host label alone.
pub fn find_member_addr<'a>(addrs: &'a [String], cluster: &Cluster, name: &str) -> Option<&'a String> {
    let fallback;
    let member = match cluster.member(name) {
        Some(member) => member,
        None => {
            fallback = Member::new(name);
            &fallback
        }
    };
    addrs.iter().find(|addr| addr_matches_member(addr, member))
}

/// Roster entry designated by `addr`.
pub fn member_for_addr<'a>(cluster: &'a Cluster, addr: &str) -> Option<&'a Member> {
    cluster.members.iter().find(|m| addr_matches_member(addr, m))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, address: &str) -> Member {
        Member {
            address: address.to_string(),
            ..Member::new(name)
        }
    }

    fn cluster(members: Vec<Member>) -> Cluster {
        Cluster {
            members,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_strips_weight_and_epoch() {
        assert_eq!(
            parse_member_addrs("10.0.0.1:13306#1;10.0.0.2:13306#1@1000"),
            vec!["10.0.0.1:13306", "10.0.0.2:13306"]
        );
    }

    #[test]
    fn test_parse_drops_tokens_without_port() {
        assert_eq!(
            parse_member_addrs("garbage;pod-0.h:13306#5;;pod-1.h:13306@2"),
            vec!["pod-0.h:13306", "pod-1.h:13306"]
        );
        assert!(parse_member_addrs("").is_empty());
        assert!(parse_member_addrs("@1000").is_empty());
    }

    #[test]
    fn test_host_and_label() {
        assert_eq!(host("pod-0.h.ns.svc:13306"), "pod-0.h.ns.svc");
        assert_eq!(host_label("pod-0.h.ns.svc:13306"), "pod-0");
        assert_eq!(host_label("pod-3:13306"), "pod-3");
        assert_eq!(host("10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn test_find_member_addr_by_label_or_address() {
        let addrs = parse_member_addrs("pod-0.h:13306#1;10.0.0.2:13306#1");
        let c = cluster(vec![member("pod-0", "10.0.0.1"), member("pod-1", "10.0.0.2")]);
        assert_eq!(find_member_addr(&addrs, &c, "pod-0").unwrap(), "pod-0.h:13306");
        assert_eq!(find_member_addr(&addrs, &c, "pod-1").unwrap(), "10.0.0.2:13306");
        assert!(find_member_addr(&addrs, &c, "pod-2").is_none());
    }

    #[test]
    fn test_member_name_is_not_matched_by_prefix() {
        // Prefix correlation would hand pod-10's endpoint to pod-1.  Whether
        // deployments ever hit that is unknown; exact matching is pinned
        // here so a regression to prefix matching shows up.
        let addrs = parse_member_addrs("pod-10.h:13306#1;pod-2.h:13306#1");
        let c = cluster(vec![member("pod-1", ""), member("pod-10", "")]);
        assert!(find_member_addr(&addrs, &c, "pod-1").is_none());
        assert_eq!(find_member_addr(&addrs, &c, "pod-10").unwrap(), "pod-10.h:13306");
    }

    #[test]
    fn test_member_for_addr() {
        let c = cluster(vec![member("pod-0", "10.0.0.1"), member("pod-1", "10.0.0.2")]);
        assert_eq!(member_for_addr(&c, "pod-1.h.ns:13306").unwrap().name, "pod-1");
        assert_eq!(member_for_addr(&c, "10.0.0.1:13306").unwrap().name, "pod-0");
        assert!(member_for_addr(&c, "pod-7.h:13306").is_none());
    }
}
