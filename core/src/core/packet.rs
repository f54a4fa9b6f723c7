use log::warn;

/// Ordered `key=value&key=value` packet as embedded devices expect it.
///
/// Parameter order is significant on these firmwares and is preserved through
/// parse/serialize. Keys are unique; on duplicate input the first occurrence
/// wins. Values may be empty.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPacket {
    pairs: Vec<(String, String)>,
}

impl DataPacket {
    /// Parses a raw `key=value&…` template. Fragments without `=` or with an
    /// empty key are dropped.
    pub fn parse(raw: &str) -> Self {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for fragment in raw.split('&') {
            let Some((key, value)) = fragment.split_once('=') else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            if pairs.iter().any(|(k, _)| k == key) {
                warn!("duplicate parameter '{}' in packet template, keeping first", key);
                continue;
            }
            pairs.push((key.to_string(), value.to_string()));
        }
        Self { pairs }
    }

    /// Serializes back to the wire form, original key order intact.
    pub fn serialize(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the value for `key`. Returns false when the key is absent;
    /// the packet never grows new parameters.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        for (k, v) in &mut self.pairs {
            if k == key {
                *v = value.to_string();
                return true;
            }
        }
        false
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_order() {
        let p = DataPacket::parse("security=none&ssid=X&hideSsid=0&wrlPwd=");
        let keys: Vec<&str> = p.keys().collect();
        assert_eq!(keys, vec!["security", "ssid", "hideSsid", "wrlPwd"]);
    }

    #[test]
    fn test_empty_values_survive_round_trip() {
        let raw = "security=none&ssid=X&hideSsid=0&wrlPwd=";
        let p = DataPacket::parse(raw);
        assert_eq!(p.get("wrlPwd"), Some(""));
        assert_eq!(p.serialize(), raw);
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let p = DataPacket::parse("a=1&a=2&b=3");
        assert_eq!(p.get("a"), Some("1"));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn test_set_only_touches_existing() {
        let mut p = DataPacket::parse("a=1&b=2");
        assert!(p.set("b", "zzz"));
        assert!(!p.set("c", "nope"));
        assert_eq!(p.serialize(), "a=1&b=zzz");
    }

    #[test]
    fn test_value_with_equals_sign() {
        let p = DataPacket::parse("cmd=x=y&other=1");
        assert_eq!(p.get("cmd"), Some("x=y"));
    }
}
