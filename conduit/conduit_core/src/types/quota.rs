//! Quota amounts.
//!
//! Sessions are paid for with two independent resources: RAM, counted in
//! bytes, and capability slots, counted individually. Both are wrapped in
//! distinct newtypes so that one can never be transferred as the other.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

/// An amount of RAM quota in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RamQuota(pub u64);

/// An amount of capability quota.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapQuota(pub u64);

impl RamQuota {
    /// The raw byte count.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl CapQuota {
    /// The raw capability count.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl Add for RamQuota {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl AddAssign for RamQuota {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Add for CapQuota {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl AddAssign for CapQuota {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl fmt::Display for RamQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CapQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// RAM and cap quota reserved for one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// RAM quota in bytes
    pub ram_quota: RamQuota,

    /// Capability quota
    pub cap_quota: CapQuota,
}

impl Resources {
    /// Create a resource pair.
    pub fn new(ram_quota: RamQuota, cap_quota: CapQuota) -> Self {
        Self {
            ram_quota,
            cap_quota,
        }
    }

    /// Check if neither resource is reserved.
    pub fn is_zero(&self) -> bool {
        self.ram_quota.0 == 0 && self.cap_quota.0 == 0
    }
}

impl Add for Resources {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            ram_quota: self.ram_quota + other.ram_quota,
            cap_quota: self.cap_quota + other.cap_quota,
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ram_quota={}, cap_quota={}",
            self.ram_quota, self.cap_quota
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resources_display_is_argument_syntax() {
        let resources = Resources::new(RamQuota(4096), CapQuota(3));
        assert_eq!(resources.to_string(), "ram_quota=4096, cap_quota=3");
    }

    #[test]
    fn test_addition_saturates() {
        let mut total = Resources::new(RamQuota(u64::MAX - 1), CapQuota(1));
        total += Resources::new(RamQuota(5), CapQuota(2));
        assert_eq!(total.ram_quota, RamQuota(u64::MAX));
        assert_eq!(total.cap_quota, CapQuota(3));
    }
}
