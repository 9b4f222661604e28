//! Priority ready-set.
//!
//! One bit per active-object priority, organised as eight groups of eight
//! bits. The group mask selects the highest non-empty group and a log2 lookup
//! table selects the bit inside it, so [`ReadySet::find_max`] costs two table
//! lookups regardless of how many priorities are set.
//!
//! The set itself does no locking. The kernel only touches it while holding
//! its critical section, together with the queue transition that caused the
//! change.

/// Maximum number of active objects (priorities `1..=MAX_ACTIVE`).
pub const MAX_ACTIVE: u8 = 63;

/// Number of priorities representable in the set (`1..=64`).
pub const PSET_WIDTH: u8 = 64;

/// `LOG2_LKUP[n]` is the 1-based index of the most significant bit of `n`.
static LOG2_LKUP: [u8; 256] = log2_table();

const fn log2_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut n = 1;
    while n < 256 {
        table[n] = (u8::BITS - (n as u8).leading_zeros()) as u8;
        n += 1;
    }
    table
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadySet {
    groups: u8,
    bits: [u8; 8],
}

impl ReadySet {
    pub const fn new() -> Self {
        Self {
            groups: 0,
            bits: [0; 8],
        }
    }

    pub fn insert(&mut self, prio: u8) {
        let (group, mask) = Self::locate(prio);
        self.bits[group] |= mask;
        self.groups |= 1 << group;
    }

    /// Clears `prio`. Removing a priority that is not present is a no-op.
    pub fn remove(&mut self, prio: u8) {
        let (group, mask) = Self::locate(prio);
        self.bits[group] &= !mask;
        if self.bits[group] == 0 {
            self.groups &= !(1 << group);
        }
    }

    pub fn contains(&self, prio: u8) -> bool {
        let (group, mask) = Self::locate(prio);
        self.bits[group] & mask != 0
    }

    /// Highest priority in the set.
    pub fn find_max(&self) -> Option<u8> {
        if self.groups == 0 {
            return None;
        }
        let group = LOG2_LKUP[self.groups as usize] - 1;
        let bit = LOG2_LKUP[self.bits[group as usize] as usize];
        Some(group * 8 + bit)
    }

    pub fn is_empty(&self) -> bool {
        self.groups == 0
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Flat view of the set: bit `p - 1` represents priority `p`.
    pub fn bits(&self) -> u64 {
        self.bits
            .iter()
            .enumerate()
            .fold(0u64, |acc, (group, byte)| acc | (u64::from(*byte) << (group * 8)))
    }

    /// Priorities in the set, highest first.
    pub fn iter_desc(&self) -> impl Iterator<Item = u8> {
        let mut remaining = *self;
        core::iter::from_fn(move || {
            let prio = remaining.find_max()?;
            remaining.remove(prio);
            Some(prio)
        })
    }

    fn locate(prio: u8) -> (usize, u8) {
        assert!(
            (1..=PSET_WIDTH).contains(&prio),
            "priority {prio} outside ready-set range 1..={PSET_WIDTH}"
        );
        let n = prio - 1;
        ((n >> 3) as usize, 1 << (n & 7))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log2_table_matches_leading_zeros() {
        assert_eq!(LOG2_LKUP[0], 0);
        assert_eq!(LOG2_LKUP[1], 1);
        assert_eq!(LOG2_LKUP[2], 2);
        assert_eq!(LOG2_LKUP[3], 2);
        assert_eq!(LOG2_LKUP[0x80], 8);
        assert_eq!(LOG2_LKUP[0xFF], 8);
    }

    #[test]
    fn insert_remove_and_find_max() {
        let mut set = ReadySet::new();
        assert!(set.is_empty());
        assert_eq!(set.find_max(), None);

        set.insert(1);
        set.insert(9);
        set.insert(64);
        assert_eq!(set.find_max(), Some(64));
        assert_eq!(set.len(), 3);

        set.remove(64);
        assert_eq!(set.find_max(), Some(9));
        set.remove(9);
        assert_eq!(set.find_max(), Some(1));
        set.remove(1);
        assert!(set.is_empty());
    }

    #[test]
    fn group_boundaries() {
        for prio in 1..=PSET_WIDTH {
            let mut set = ReadySet::new();
            set.insert(prio);
            assert!(set.contains(prio));
            assert_eq!(set.find_max(), Some(prio));
            assert_eq!(set.bits(), 1u64 << (prio - 1));
        }
    }

    #[test]
    fn removing_absent_priority_is_noop() {
        let mut set = ReadySet::new();
        set.insert(5);
        set.insert(12);
        let before = set;

        set.remove(7);
        set.remove(13);
        assert_eq!(set, before);

        let mut empty = ReadySet::new();
        empty.remove(3);
        assert_eq!(empty, ReadySet::new());
    }

    #[test]
    fn iter_desc_walks_highest_first() {
        let mut set = ReadySet::new();
        for prio in [3, 40, 17, 8] {
            set.insert(prio);
        }
        assert_eq!(set.iter_desc().collect::<Vec<_>>(), vec![40, 17, 8, 3]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    #[should_panic(expected = "outside ready-set range")]
    fn priority_zero_is_rejected() {
        ReadySet::new().insert(0);
    }
}
