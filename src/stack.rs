// src/stack.rs
use crate::probe::SwitchInventory;
use crate::target::Target;
use regex::Regex;
use std::sync::LazyLock;

static MEMBER_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(\*)?\s*(\d+)\s+(\S+)\s+[0-9A-Fa-f]{4}\.[0-9A-Fa-f]{4}\.[0-9A-Fa-f]{4}\s+(\d+)\b",
    )
    .expect("valid member regex")
});

/// Highest priority a stack member can be given.
const MAX_PRIORITY: u32 = 15;

/// One row of `show switch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub unit: u32,
    pub active: bool,
    pub role: String,
    pub priority: u32,
}

pub fn parse_members(output: &str) -> Vec<Member> {
    MEMBER_ROW
        .captures_iter(output)
        .filter_map(|caps| {
            Some(Member {
                unit: caps[2].parse().ok()?,
                active: caps.get(1).is_some(),
                role: caps[3].to_string(),
                priority: caps[4].parse().ok()?,
            })
        })
        .collect()
}

/// Probed units whose serial belongs to another target number, as
/// `(current, target)` pairs.
pub fn renumber_plan(target: &Target, inventory: &SwitchInventory) -> Vec<(u32, u32)> {
    assignments(target, inventory)
        .filter(|(old, new)| old != new)
        .collect()
}

/// Priority changes `(current unit, priority)` so the lowest target number
/// wins the next election. Empty when the active unit already is the
/// lowest-numbered one.
pub fn priority_plan(target: &Target, inventory: &SwitchInventory, members: &[Member]) -> Vec<(u32, u32)> {
    let Some(active) = members.iter().find(|m| m.active) else {
        return Vec::new();
    };
    let matched = assignments(target, inventory).collect::<Vec<_>>();
    let Some(lowest) = matched.iter().map(|(_, new)| *new).min() else {
        return Vec::new();
    };
    let active_new = matched
        .iter()
        .find(|(old, _)| *old == active.unit)
        .map(|(_, new)| *new);
    if active_new == Some(lowest) {
        return Vec::new();
    }

    matched
        .iter()
        .filter_map(|&(old, new)| {
            let desired = 16u32.saturating_sub(new).clamp(1, MAX_PRIORITY);
            let current = members.iter().find(|m| m.unit == old).map(|m| m.priority);
            (current != Some(desired)).then_some((old, desired))
        })
        .collect()
}

fn assignments<'a>(target: &'a Target, inventory: &'a SwitchInventory) -> impl Iterator<Item = (u32, u32)> + 'a {
    inventory
        .units()
        .iter()
        .filter_map(|(old, serial)| Some((*old, target.unit_of(serial)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_SWITCH: &str = "Switch/Stack Mac Address : 0c75.bd11.2b00 - Local Mac Address
Mac persistency wait time: Indefinite
                                             H/W   Current
Switch#   Role    Mac Address     Priority Version  State
-------------------------------------------------------------
*1       Active   0c75.bd11.2b00     15     V02     Ready
 2       Standby  0c75.bd11.3c00     14     V02     Ready
";

    fn target(stack: &[(u32, &str)]) -> Target {
        Target {
            stack: stack.iter().map(|(u, s)| (*u, s.to_string())).collect(),
            version: None,
            base_url: None,
            install: None,
            config: None,
            subst: None,
            cli: None,
            save: None,
            template: None,
        }
    }

    fn inventory(units: &[(u32, &str)]) -> SwitchInventory {
        units.iter().map(|(u, s)| (*u, s.to_string())).collect()
    }

    #[test]
    fn parses_show_switch() {
        let members = parse_members(SHOW_SWITCH);
        assert_eq!(members.len(), 2);
        assert_eq!(
            members[0],
            Member {
                unit: 1,
                active: true,
                role: "Active".into(),
                priority: 15
            }
        );
        assert!(!members[1].active);
        assert_eq!(members[1].priority, 14);
    }

    #[test]
    fn swapped_units_need_two_renumbers() {
        let plan = renumber_plan(
            &target(&[(1, "BBB"), (2, "AAA")]),
            &inventory(&[(1, "AAA"), (2, "BBB")]),
        );
        assert_eq!(plan, vec![(1, 2), (2, 1)]);
    }

    #[test]
    fn matching_stack_needs_nothing() {
        let t = target(&[(1, "AAA"), (2, "BBB")]);
        let inv = inventory(&[(1, "AAA"), (2, "BBB")]);
        assert!(renumber_plan(&t, &inv).is_empty());
        assert!(priority_plan(&t, &inv, &parse_members(SHOW_SWITCH)).is_empty());
    }

    #[test]
    fn unknown_units_are_left_alone() {
        let plan = renumber_plan(&target(&[(3, "AAA")]), &inventory(&[(1, "AAA"), (2, "ZZZ")]));
        assert_eq!(plan, vec![(1, 3)]);
    }

    #[test]
    fn priorities_follow_target_numbers() {
        // active unit 1 (AAA) becomes unit 2, so unit 1's new owner must win
        let t = target(&[(1, "BBB"), (2, "AAA")]);
        let inv = inventory(&[(1, "AAA"), (2, "BBB")]);
        let plan = priority_plan(&t, &inv, &parse_members(SHOW_SWITCH));
        assert_eq!(plan, vec![(1, 14), (2, 15)]);
    }

    #[test]
    fn priorities_skip_units_already_set() {
        let t = target(&[(1, "BBB"), (2, "AAA")]);
        let inv = inventory(&[(1, "AAA"), (2, "BBB")]);
        let members = vec![
            Member { unit: 1, active: true, role: "Active".into(), priority: 14 },
            Member { unit: 2, active: false, role: "Standby".into(), priority: 1 },
        ];
        assert_eq!(priority_plan(&t, &inv, &members), vec![(2, 15)]);
        assert!(priority_plan(&t, &inv, &[]).is_empty());
    }
}
