//! GeoIP 데이터셋
//!
//! JSON 배열 형식의 CIDR 목록을 메모리에 올려 최장 접두사 일치로 조회합니다.
//! 항목은 주소 체계와 접두사 길이별 해시 테이블로 나뉘어, 조회 비용이 항목 수가 아니라
//! 서로 다른 접두사 길이 수에 비례합니다.
//!
//! ```json
//! [
//!   {"network": "203.0.113.0/24", "country": "Exampleland", "country_code": "EX",
//!    "city": "Sample City", "latitude": 1.5, "longitude": 2.5, "asn": "AS64500", "org": "Example Net"}
//! ]
//! ```
//!
//! 문자열 필드가 없으면 `"Unknown"`, 좌표가 없으면 `0.0`을 사용합니다.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;
use trapwire_core::types::GeoInfo;

use super::GeoResolver;
use crate::error::IngestError;

/// CIDR 네트워크
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// `"203.0.113.0/24"` 형식을 파싱합니다. 접두사가 없으면 단일 호스트입니다.
    pub fn parse(s: &str) -> Option<Self> {
        let (addr_str, prefix_str) = match s.trim().split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s.trim(), None),
        };
        let addr: IpAddr = addr_str.parse().ok()?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix_str {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max)?,
            None => max,
        };
        Some(Self { addr, prefix })
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// 주소가 이 네트워크에 속하는지 확인합니다. 주소 체계가 다르면 `false`입니다.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.addr.is_ipv4() == ip.is_ipv4()
            && masked_bits(self.addr, self.prefix) == masked_bits(ip, self.prefix)
    }

    /// 접두사 밖의 비트를 지운 네트워크 주소
    fn network_bits(&self) -> u128 {
        masked_bits(self.addr, self.prefix)
    }
}

/// 주소의 상위 `prefix` 비트만 남깁니다.
fn masked_bits(ip: IpAddr, prefix: u8) -> u128 {
    match ip {
        IpAddr::V4(v4) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            u128::from(u32::from(v4) & mask)
        }
        IpAddr::V6(v6) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            u128::from(v6) & mask
        }
    }
}

/// 같은 접두사 길이의 네트워크들
#[derive(Debug)]
struct PrefixTable {
    prefix: u8,
    networks: HashMap<u128, GeoInfo>,
}

/// 접두사 길이 내림차순으로 정렬된 테이블 목록
#[derive(Debug, Default)]
struct FamilyIndex {
    tables: Vec<PrefixTable>,
}

impl FamilyIndex {
    /// 같은 네트워크가 여러 번 나오면 처음 것을 유지합니다.
    fn insert(&mut self, cidr: Cidr, info: GeoInfo) -> bool {
        let position = match self.tables.iter().position(|t| t.prefix <= cidr.prefix) {
            Some(pos) if self.tables[pos].prefix == cidr.prefix => pos,
            Some(pos) => {
                self.tables.insert(pos, PrefixTable::new(cidr.prefix));
                pos
            }
            None => {
                self.tables.push(PrefixTable::new(cidr.prefix));
                self.tables.len() - 1
            }
        };
        match self.tables[position].networks.entry(cidr.network_bits()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(info);
                true
            }
        }
    }

    fn lookup(&self, ip: IpAddr) -> Option<&GeoInfo> {
        self.tables
            .iter()
            .find_map(|t| t.networks.get(&masked_bits(ip, t.prefix)))
    }

    fn len(&self) -> usize {
        self.tables.iter().map(|t| t.networks.len()).sum()
    }
}

impl PrefixTable {
    fn new(prefix: u8) -> Self {
        Self {
            prefix,
            networks: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeoRecord {
    network: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    asn: Option<String>,
    #[serde(default)]
    org: Option<String>,
}

impl GeoRecord {
    fn into_info(self) -> GeoInfo {
        let unknown = GeoInfo::unknown();
        GeoInfo {
            country: self.country.unwrap_or(unknown.country),
            country_code: self.country_code.unwrap_or(unknown.country_code),
            region: self.region.unwrap_or(unknown.region),
            city: self.city.unwrap_or(unknown.city),
            latitude: self.latitude,
            longitude: self.longitude,
            timezone: self.timezone.unwrap_or(unknown.timezone),
            asn: self.asn.unwrap_or(unknown.asn),
            org: self.org.unwrap_or(unknown.org),
        }
    }
}

/// 인메모리 GeoIP 데이터베이스
///
/// 긴 접두사 테이블부터 확인하므로 첫 일치가 최장 일치입니다.
#[derive(Debug, Default)]
pub struct GeoDatabase {
    v4: FamilyIndex,
    v6: FamilyIndex,
}

impl GeoDatabase {
    /// 빈 데이터베이스 (모든 조회가 미스)
    pub fn empty() -> Self {
        Self::default()
    }

    /// JSON 문자열에서 데이터베이스를 생성합니다.
    ///
    /// 네트워크 표기가 잘못된 항목은 경고 후 건너뜁니다.
    pub fn from_json(json: &str) -> Result<Self, IngestError> {
        let records: Vec<GeoRecord> =
            serde_json::from_str(json).map_err(|e| IngestError::GeoDataset {
                path: "<inline>".to_owned(),
                reason: e.to_string(),
            })?;

        let mut db = Self::default();
        for record in records {
            let Some(cidr) = Cidr::parse(&record.network) else {
                tracing::warn!(network = %record.network, "skipping invalid geo network");
                continue;
            };
            let index = if cidr.addr.is_ipv4() {
                &mut db.v4
            } else {
                &mut db.v6
            };
            let network = record.network.clone();
            if !index.insert(cidr, record.into_info()) {
                tracing::debug!(network = %network, "duplicate geo network, keeping first entry");
            }
        }
        Ok(db)
    }

    /// 파일에서 데이터베이스를 로드합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| IngestError::GeoDataset {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
        Self::from_json(&content).map_err(|e| match e {
            IngestError::GeoDataset { reason, .. } => IngestError::GeoDataset {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// 파일에서 로드하되, 실패하면 경고를 남기고 빈 데이터베이스를 사용합니다.
    pub async fn load_or_empty(path: impl AsRef<Path>) -> Self {
        match Self::load(path).await {
            Ok(db) => {
                tracing::info!(entries = db.len(), "geo dataset loaded");
                db
            }
            Err(e) => {
                tracing::warn!(error = %e, "geo dataset unavailable, every lookup resolves to unknown");
                Self::empty()
            }
        }
    }

    /// 서로 다른 네트워크 수
    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GeoResolver for GeoDatabase {
    fn lookup(&self, ip: IpAddr) -> Result<Option<GeoInfo>, IngestError> {
        let index = if ip.is_ipv4() { &self.v4 } else { &self.v6 };
        Ok(index.lookup(ip).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET: &str = r#"[
        {"network": "203.0.113.0/24", "country": "Exampleland", "country_code": "EX", "city": "Wide"},
        {"network": "203.0.113.5/32", "country": "Exampleland", "country_code": "EX", "city": "Narrow",
         "latitude": 10.5, "longitude": -20.25, "asn": "AS64500", "org": "Example Net"},
        {"network": "2001:db8::/32", "country": "Sixland", "country_code": "SX"},
        {"network": "not-a-network", "country": "Nowhere"}
    ]"#;

    #[test]
    fn cidr_parse_and_contains() {
        let net = Cidr::parse("10.1.0.0/16").unwrap();
        assert!(net.contains("10.1.200.3".parse().unwrap()));
        assert!(!net.contains("10.2.0.1".parse().unwrap()));
        assert!(!net.contains("::1".parse().unwrap()));

        let any = Cidr::parse("0.0.0.0/0").unwrap();
        assert!(any.contains("8.8.8.8".parse().unwrap()));

        let host = Cidr::parse("192.0.2.1").unwrap();
        assert_eq!(host.prefix(), 32);

        assert!(Cidr::parse("10.0.0.0/33").is_none());
        assert!(Cidr::parse("garbage/8").is_none());
    }

    #[test]
    fn longest_prefix_wins() {
        let db = GeoDatabase::from_json(DATASET).unwrap();
        assert_eq!(db.len(), 3);

        let narrow = db.lookup("203.0.113.5".parse().unwrap()).unwrap().unwrap();
        assert_eq!(narrow.city, "Narrow");
        assert_eq!(narrow.asn, "AS64500");
        assert_eq!(narrow.latitude, 10.5);

        let wide = db.lookup("203.0.113.77".parse().unwrap()).unwrap().unwrap();
        assert_eq!(wide.city, "Wide");
        assert_eq!(wide.region, "Unknown");
        assert_eq!(wide.timezone, "UTC");
    }

    #[test]
    fn longest_prefix_among_many_networks() {
        let mut records: Vec<serde_json::Value> = (0..=255u16)
            .flat_map(|a| (0..8u16).map(move |b| (a, b)))
            .map(|(a, b)| {
                serde_json::json!({"network": format!("100.{a}.{b}.0/24"), "city": format!("filler-{a}-{b}")})
            })
            .collect();
        records.push(serde_json::json!({"network": "10.0.0.0/8", "city": "Eight"}));
        records.push(serde_json::json!({"network": "10.20.0.0/16", "city": "Sixteen"}));
        records.push(serde_json::json!({"network": "10.20.30.0/24", "city": "TwentyFour"}));
        records.push(serde_json::json!({"network": "10.20.30.40/32", "city": "Host"}));
        // 호스트 비트가 켜진 표기는 네트워크 주소로 정규화
        records.push(serde_json::json!({"network": "172.16.5.9/12", "city": "Unaligned"}));
        // 같은 네트워크가 다시 나오면 처음 것이 유지됨
        records.push(serde_json::json!({"network": "10.20.0.0/16", "city": "Duplicate"}));

        let db = GeoDatabase::from_json(&serde_json::Value::Array(records).to_string()).unwrap();
        assert_eq!(db.len(), 256 * 8 + 5);

        let city = |ip: &str| db.lookup(ip.parse().unwrap()).unwrap().map(|info| info.city);
        assert_eq!(city("10.20.30.40").as_deref(), Some("Host"));
        assert_eq!(city("10.20.30.41").as_deref(), Some("TwentyFour"));
        assert_eq!(city("10.20.99.1").as_deref(), Some("Sixteen"));
        assert_eq!(city("10.99.0.1").as_deref(), Some("Eight"));
        assert_eq!(city("172.31.255.1").as_deref(), Some("Unaligned"));
        assert_eq!(city("100.200.7.9").as_deref(), Some("filler-200-7"));
        assert_eq!(city("100.200.8.9"), None);
        assert_eq!(city("11.0.0.1"), None);
        assert_eq!(city("::ffff:10.20.30.40"), None);
    }

    #[test]
    fn ipv6_lookup() {
        let db = GeoDatabase::from_json(DATASET).unwrap();
        let info = db.lookup("2001:db8::1".parse().unwrap()).unwrap().unwrap();
        assert_eq!(info.country_code, "SX");
    }

    #[test]
    fn miss_returns_none() {
        let db = GeoDatabase::from_json(DATASET).unwrap();
        assert!(db.lookup("198.51.100.1".parse().unwrap()).unwrap().is_none());
        assert!(GeoDatabase::empty().lookup("1.1.1.1".parse().unwrap()).unwrap().is_none());
    }

    #[test]
    fn invalid_json_is_error() {
        assert!(GeoDatabase::from_json("{").is_err());
    }

    #[tokio::test]
    async fn load_or_empty_tolerates_missing_file() {
        let db = GeoDatabase::load_or_empty("/nonexistent/trapwire/geo.json").await;
        assert!(db.is_empty());
    }

    #[tokio::test]
    async fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo.json");
        tokio::fs::write(&path, DATASET).await.unwrap();
        let db = GeoDatabase::load(&path).await.unwrap();
        assert_eq!(db.len(), 3);
    }
}
