//! Recognized platform vendors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of vendors the arbiter knows how to classify.
///
/// Variants are declared alphabetically by key so that ordered maps keyed by
/// `Vendor` iterate in key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Amd,
    Apple,
    Intel,
    Nvidia,
}

impl Vendor {
    pub const ALL: [Vendor; 4] = [Vendor::Amd, Vendor::Apple, Vendor::Intel, Vendor::Nvidia];

    /// Short key used to select a platform.
    pub fn key(&self) -> &'static str {
        match self {
            Vendor::Amd => "amd",
            Vendor::Apple => "apple",
            Vendor::Intel => "intel",
            Vendor::Nvidia => "nvidia",
        }
    }

    /// Classify a backend vendor string (case-insensitive substring match).
    pub fn classify(vendor: &str) -> Option<Vendor> {
        let vendor = vendor.to_lowercase();
        if vendor.contains("nvidia") {
            Some(Vendor::Nvidia)
        } else if vendor.contains("advanced micro devices") || vendor.contains("amd") {
            Some(Vendor::Amd)
        } else if vendor.contains("intel") {
            Some(Vendor::Intel)
        } else if vendor.contains("apple") {
            Some(Vendor::Apple)
        } else {
            None
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vendor::ALL
            .into_iter()
            .find(|v| v.key().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown platform key '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(Vendor::classify("NVIDIA Corporation"), Some(Vendor::Nvidia));
        assert_eq!(Vendor::classify("Advanced Micro Devices, Inc."), Some(Vendor::Amd));
        assert_eq!(Vendor::classify("AMD"), Some(Vendor::Amd));
        assert_eq!(Vendor::classify("Intel(R) Corporation"), Some(Vendor::Intel));
        assert_eq!(Vendor::classify("Apple"), Some(Vendor::Apple));
        assert_eq!(Vendor::classify("Mesa/X.org"), None);
    }

    #[test]
    fn test_key_round_trip() {
        for vendor in Vendor::ALL {
            assert_eq!(vendor.key().parse::<Vendor>(), Ok(vendor));
        }
        assert_eq!("NVIDIA".parse::<Vendor>(), Ok(Vendor::Nvidia));
        assert!("pocl".parse::<Vendor>().is_err());
    }

    #[test]
    fn test_order_is_alphabetical_by_key() {
        let mut keys: Vec<_> = Vendor::ALL.iter().map(Vendor::key).collect();
        keys.sort();
        let ordered: Vec<_> = {
            let mut v = Vendor::ALL.to_vec();
            v.sort();
            v.iter().map(Vendor::key).collect()
        };
        assert_eq!(keys, ordered);
    }
}
