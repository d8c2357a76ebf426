//! Symbol resolution for bracketed addresses such as `[0x7f3a12]`.
//!
//! JIT-ed code shows up in callchains as raw addresses. The server ships the
//! perf symbol maps written by the runtimes, and the viewer turns addresses
//! back into names by binary search over each map's sorted ranges.

use std::collections::{BTreeMap, HashMap};

use profview_protocol::AddressRange;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("map {map}: entry {index}: invalid address {value:?}")]
    BadAddress {
        map: String,
        index: usize,
        value: String,
    },
    #[error("map {map}: entry {index}: range end precedes start")]
    Inverted { map: String, index: usize },
    #[error("map {map}: entry {index} is unsorted or overlaps its predecessor")]
    Unsorted { map: String, index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MappedRange {
    start: u64,
    end: u64,
    symbol: String,
}

/// One named perf map: disjoint inclusive ranges sorted by start address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressMap {
    ranges: Vec<MappedRange>,
}

/// Outcome of a binary search, with the number of ranges inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub index: Option<usize>,
    pub probes: u32,
}

impl AddressMap {
    /// Validate and parse the raw `[start_hex, end_hex, symbol]` triples.
    pub fn from_ranges(name: &str, raw: &[AddressRange]) -> Result<Self, MapError> {
        let mut ranges: Vec<MappedRange> = Vec::with_capacity(raw.len());
        for (index, AddressRange(start, end, symbol)) in raw.iter().enumerate() {
            let start = parse_hex(start).ok_or_else(|| MapError::BadAddress {
                map: name.to_string(),
                index,
                value: start.clone(),
            })?;
            let end = parse_hex(end).ok_or_else(|| MapError::BadAddress {
                map: name.to_string(),
                index,
                value: end.clone(),
            })?;
            if end < start {
                return Err(MapError::Inverted {
                    map: name.to_string(),
                    index,
                });
            }
            if let Some(prev) = ranges.last()
                && start <= prev.end
            {
                return Err(MapError::Unsorted {
                    map: name.to_string(),
                    index,
                });
            }
            ranges.push(MappedRange {
                start,
                end,
                symbol: symbol.clone(),
            });
        }
        Ok(Self { ranges })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Symbol of the range containing `addr`, if any.
    pub fn lookup(&self, addr: u64) -> Option<&str> {
        self.probe(addr)
            .index
            .map(|i| self.ranges[i].symbol.as_str())
    }

    /// Binary search for the range containing `addr`.
    pub fn probe(&self, addr: u64) -> Probe {
        let mut lo = 0usize;
        let mut hi = self.ranges.len();
        let mut probes = 0;

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let range = &self.ranges[mid];
            probes += 1;
            if addr < range.start {
                hi = mid;
            } else if addr > range.end {
                lo = mid + 1;
            } else {
                return Probe {
                    index: Some(mid),
                    probes,
                };
            }
        }

        Probe {
            index: None,
            probes,
        }
    }
}

/// Resolves `(token, map name)` pairs against the session's perf maps.
#[derive(Debug, Clone, Default)]
pub struct AddressResolver {
    maps: HashMap<String, AddressMap>,
    cache: HashMap<(String, String), String>,
}

impl AddressResolver {
    /// Build a resolver from the perf-map payload. Any malformed map rejects
    /// the whole payload.
    pub fn from_perf_maps(raw: &BTreeMap<String, Vec<AddressRange>>) -> Result<Self, MapError> {
        let maps = raw
            .iter()
            .map(|(name, ranges)| Ok((name.clone(), AddressMap::from_ranges(name, ranges)?)))
            .collect::<Result<HashMap<_, _>, MapError>>()?;
        Ok(Self {
            maps,
            cache: HashMap::new(),
        })
    }

    /// A resolver with no maps; every token resolves to itself.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn map(&self, name: &str) -> Option<&AddressMap> {
        self.maps.get(name)
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    /// Number of memoised resolutions.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Display string for `token` found in map `map_name`.
    ///
    /// Tokens that are not a bracketed lowercase hex address, addresses in an
    /// unknown map and addresses outside every range come back unchanged.
    pub fn resolve(&mut self, token: &str, map_name: &str) -> String {
        if let Some(hit) = self.cache.get(&(token.to_string(), map_name.to_string())) {
            return hit.clone();
        }

        let Some(addr) = parse_bracketed(token) else {
            return token.to_string();
        };
        let Some(map) = self.maps.get(map_name) else {
            return token.to_string();
        };
        match map.lookup(addr) {
            Some(symbol) => {
                let symbol = symbol.to_string();
                self.cache
                    .insert((token.to_string(), map_name.to_string()), symbol.clone());
                symbol
            }
            None => token.to_string(),
        }
    }
}

/// `[0x<lowercase hex>]` → address.
fn parse_bracketed(token: &str) -> Option<u64> {
    let hex = token.strip_prefix("[0x")?.strip_suffix(']')?;
    if hex.is_empty()
        || !hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

/// Map bounds, with or without a `0x` prefix, either case.
fn parse_hex(s: &str) -> Option<u64> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64, symbol: &str) -> AddressRange {
        AddressRange(format!("{start:x}"), format!("0x{end:x}"), symbol.into())
    }

    fn resolver() -> AddressResolver {
        let mut raw = BTreeMap::new();
        raw.insert(
            "perf-42.map".to_string(),
            vec![
                range(0x1000, 0x10ff, "jit_a"),
                range(0x2000, 0x20ff, "jit_b"),
                range(0x3000, 0x30ff, "jit_c"),
            ],
        );
        AddressResolver::from_perf_maps(&raw).expect("valid maps")
    }

    #[test]
    fn non_address_tokens_pass_through() {
        let mut r = resolver();
        for token in ["main", "[0X1000]", "0x1000", "[0x]", "[0xABC]", "[0x10g0]", ""] {
            assert_eq!(r.resolve(token, "perf-42.map"), token);
        }
        assert_eq!(r.cached(), 0);
    }

    #[test]
    fn resolves_inside_ranges_inclusive() {
        let mut r = resolver();
        assert_eq!(r.resolve("[0x1000]", "perf-42.map"), "jit_a");
        assert_eq!(r.resolve("[0x10ff]", "perf-42.map"), "jit_a");
        assert_eq!(r.resolve("[0x2080]", "perf-42.map"), "jit_b");
        assert_eq!(r.resolve("[0x30ff]", "perf-42.map"), "jit_c");
        assert_eq!(r.cached(), 4);
    }

    #[test]
    fn misses_return_token() {
        let mut r = resolver();
        assert_eq!(r.resolve("[0xfff]", "perf-42.map"), "[0xfff]");
        assert_eq!(r.resolve("[0x1100]", "perf-42.map"), "[0x1100]");
        assert_eq!(r.resolve("[0x9000]", "perf-42.map"), "[0x9000]");
        assert_eq!(r.resolve("[0x1000]", "perf-7.map"), "[0x1000]");
        assert_eq!(r.cached(), 0);
    }

    #[test]
    fn memoised_per_token_and_map() {
        let mut r = resolver();
        assert_eq!(r.resolve("[0x1001]", "perf-42.map"), "jit_a");
        assert_eq!(r.resolve("[0x1001]", "perf-42.map"), "jit_a");
        assert_eq!(r.cached(), 1);
    }

    #[test]
    fn binary_search_agrees_with_linear_scan() {
        let n = 1000u64;
        let raw: Vec<_> = (0..n)
            .map(|i| range(i * 0x100, i * 0x100 + 0x7f, &format!("sym{i}")))
            .collect();
        let map = AddressMap::from_ranges("m", &raw).expect("valid");
        let limit = (n as f64).log2().ceil() as u32 + 1;

        for addr in (0..n * 0x100 + 0x200).step_by(0x3d) {
            let linear = raw.iter().position(|AddressRange(s, e, _)| {
                let s = parse_hex(s).unwrap_or(u64::MAX);
                let e = parse_hex(e).unwrap_or(0);
                addr >= s && addr <= e
            });
            let probe = map.probe(addr);
            assert_eq!(probe.index, linear, "addr {addr:#x}");
            assert!(probe.probes <= limit, "addr {addr:#x}: {} probes", probe.probes);
        }
    }

    #[test]
    fn rejects_malformed_maps() {
        let unsorted = vec![range(0x2000, 0x20ff, "b"), range(0x1000, 0x10ff, "a")];
        assert_eq!(
            AddressMap::from_ranges("m", &unsorted),
            Err(MapError::Unsorted {
                map: "m".into(),
                index: 1
            })
        );

        let overlapping = vec![range(0x1000, 0x20ff, "a"), range(0x2000, 0x30ff, "b")];
        assert!(matches!(
            AddressMap::from_ranges("m", &overlapping),
            Err(MapError::Unsorted { .. })
        ));

        let inverted = vec![range(0x2000, 0x1000, "a")];
        assert!(matches!(
            AddressMap::from_ranges("m", &inverted),
            Err(MapError::Inverted { .. })
        ));

        let garbage = vec![AddressRange("zz".into(), "0x10".into(), "a".into())];
        assert!(matches!(
            AddressMap::from_ranges("m", &garbage),
            Err(MapError::BadAddress { .. })
        ));
    }

    #[test]
    fn empty_resolver_is_identity() {
        let mut r = AddressResolver::empty();
        assert_eq!(r.resolve("[0x1000]", "perf-42.map"), "[0x1000]");
        assert_eq!(r.map_count(), 0);
    }
}
