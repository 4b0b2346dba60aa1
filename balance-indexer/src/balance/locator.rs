use bitcoincore_rpc::bitcoin::hashes::Hash;
use bitcoincore_rpc::bitcoin::{BlockHash, Txid};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Height recorded for records not yet included in a block. Printed like any
/// other height, so unconfirmed records sort after every confirmed one.
pub const UNCONFIRMED_HEIGHT: u32 = u32::MAX;

/// Position of a record within the history of its subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BalanceLocator {
    Confirmed {
        height: u32,
        block_id: BlockHash,
        transaction_id: Txid,
    },
    Unconfirmed {
        seen_ms: u64,
        transaction_id: Txid,
    },
}

impl BalanceLocator {
    pub fn height(&self) -> u32 {
        match self {
            BalanceLocator::Confirmed { height, .. } => *height,
            BalanceLocator::Unconfirmed { .. } => UNCONFIRMED_HEIGHT,
        }
    }

    pub fn transaction_id(&self) -> &Txid {
        match self {
            BalanceLocator::Confirmed { transaction_id, .. } => transaction_id,
            BalanceLocator::Unconfirmed { transaction_id, .. } => transaction_id,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, BalanceLocator::Confirmed { .. })
    }
}

// Hashes print in reversed byte order, compare them the same way
fn display_cmp(a: &[u8; 32], b: &[u8; 32]) -> Ordering {
    a.iter().rev().cmp(b.iter().rev())
}

impl Ord for BalanceLocator {
    fn cmp(&self, other: &Self) -> Ordering {
        self.height().cmp(&other.height()).then_with(|| match (self, other) {
            (
                BalanceLocator::Confirmed {
                    block_id: a_block,
                    transaction_id: a_tx,
                    ..
                },
                BalanceLocator::Confirmed {
                    block_id: b_block,
                    transaction_id: b_tx,
                    ..
                },
            ) => display_cmp(a_block.as_byte_array(), b_block.as_byte_array())
                .then_with(|| display_cmp(a_tx.as_byte_array(), b_tx.as_byte_array())),
            (
                BalanceLocator::Unconfirmed {
                    seen_ms: a_seen,
                    transaction_id: a_tx,
                },
                BalanceLocator::Unconfirmed {
                    seen_ms: b_seen,
                    transaction_id: b_tx,
                },
            ) => a_seen
                .cmp(b_seen)
                .then_with(|| display_cmp(a_tx.as_byte_array(), b_tx.as_byte_array())),
            (BalanceLocator::Confirmed { .. }, BalanceLocator::Unconfirmed { .. }) => {
                Ordering::Less
            }
            (BalanceLocator::Unconfirmed { .. }, BalanceLocator::Confirmed { .. }) => {
                Ordering::Greater
            }
        })
    }
}

impl PartialOrd for BalanceLocator {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BalanceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceLocator::Confirmed {
                height,
                block_id,
                transaction_id,
            } => write!(f, "{:010}-{}-{}", height, block_id, transaction_id),
            BalanceLocator::Unconfirmed {
                seen_ms,
                transaction_id,
            } => write!(f, "{:010}-{:020}-{}", UNCONFIRMED_HEIGHT, seen_ms, transaction_id),
        }
    }
}

impl FromStr for BalanceLocator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(3, '-').collect();
        if parts.len() != 3 {
            let msg = format!("Invalid balance locator {}: expected 3 parts", s);
            error!("{}", msg);
            return Err(msg);
        }

        parse_locator_parts(parts[0], parts[1], parts[2])
    }
}

pub(crate) fn parse_locator_parts(
    height: &str,
    middle: &str,
    txid: &str,
) -> Result<BalanceLocator, String> {
    let height = height.parse::<u32>().map_err(|e| {
        let msg = format!("Invalid locator height {}: {}", height, e);
        error!("{}", msg);
        msg
    })?;
    let transaction_id = Txid::from_str(txid).map_err(|e| {
        let msg = format!("Invalid locator transaction id {}: {}", txid, e);
        error!("{}", msg);
        msg
    })?;

    if height == UNCONFIRMED_HEIGHT {
        let seen_ms = middle.parse::<u64>().map_err(|e| {
            let msg = format!("Invalid locator seen time {}: {}", middle, e);
            error!("{}", msg);
            msg
        })?;
        return Ok(BalanceLocator::Unconfirmed {
            seen_ms,
            transaction_id,
        });
    }

    let block_id = BlockHash::from_str(middle).map_err(|e| {
        let msg = format!("Invalid locator block id {}: {}", middle, e);
        error!("{}", msg);
        msg
    })?;

    Ok(BalanceLocator::Confirmed {
        height,
        block_id,
        transaction_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed(height: u32, block: u8, tx: u8) -> BalanceLocator {
        BalanceLocator::Confirmed {
            height,
            block_id: BlockHash::from_byte_array([block; 32]),
            transaction_id: Txid::from_byte_array([tx; 32]),
        }
    }

    fn unconfirmed(seen_ms: u64, tx: u8) -> BalanceLocator {
        BalanceLocator::Unconfirmed {
            seen_ms,
            transaction_id: Txid::from_byte_array([tx; 32]),
        }
    }

    #[test]
    fn test_locator_string_form() {
        let loc = confirmed(100, 1, 2);
        let s = loc.to_string();
        assert!(s.starts_with("0000000100-"));
        assert_eq!(s.parse::<BalanceLocator>().unwrap(), loc);

        let loc = unconfirmed(1_700_000_000_000, 3);
        let s = loc.to_string();
        assert!(s.starts_with("4294967295-00000001700000000000-"));
        assert_eq!(s.parse::<BalanceLocator>().unwrap(), loc);
        assert_eq!(loc.height(), UNCONFIRMED_HEIGHT);

        assert!("12-ab".parse::<BalanceLocator>().is_err());
        assert!("x-ab-cd".parse::<BalanceLocator>().is_err());
    }

    #[test]
    fn test_locator_order_matches_string_order() {
        let mut txid_bytes = [0u8; 32];
        txid_bytes[0] = 0xff;
        let mut other = [0u8; 32];
        other[31] = 0x01;

        let locators = vec![
            confirmed(5, 9, 1),
            confirmed(100, 1, 2),
            confirmed(100, 1, 3),
            confirmed(99, 7, 7),
            BalanceLocator::Confirmed {
                height: 7,
                block_id: BlockHash::from_byte_array([1u8; 32]),
                transaction_id: Txid::from_byte_array(txid_bytes),
            },
            BalanceLocator::Confirmed {
                height: 7,
                block_id: BlockHash::from_byte_array([1u8; 32]),
                transaction_id: Txid::from_byte_array(other),
            },
            unconfirmed(10, 1),
            unconfirmed(9, 5),
            confirmed(4_000_000_000, 2, 2),
        ];

        for a in &locators {
            for b in &locators {
                assert_eq!(a.cmp(b), a.to_string().cmp(&b.to_string()), "{} vs {}", a, b);
            }
        }

        // Unconfirmed records always sort last
        let max_confirmed = locators.iter().filter(|l| l.is_confirmed()).max().unwrap();
        let min_unconfirmed = locators.iter().filter(|l| !l.is_confirmed()).min().unwrap();
        assert!(max_confirmed < min_unconfirmed);
    }
}
