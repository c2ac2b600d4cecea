//! Common-name resolution ("Vela Junior" → sky position).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;

use crate::data::catalog::SourceCatalog;
use crate::error::AppError;
use crate::sky::SkyCoord;

const SESAME_URL: &str = "https://cds.unistra.fr/cgi-bin/nph-sesame/-oI/SNV";
const SESAME_TIMEOUT_SECS: u64 = 20;

pub trait NameResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<SkyCoord, AppError>;
}

/// Offline resolver backed by a YAML mapping of names to positions:
///
/// ```yaml
/// Vela Junior: {lon: 133.0, lat: -46.33, frame: icrs}
/// ```
#[derive(Debug, Clone, Default)]
pub struct TableResolver {
    entries: BTreeMap<String, SkyCoord>,
}

impl TableResolver {
    pub fn new(entries: impl IntoIterator<Item = (String, SkyCoord)>) -> Self {
        Self {
            entries: entries.into_iter().map(|(k, v)| (normalize(&k), v)).collect(),
        }
    }

    pub fn read(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path)
            .map_err(|e| AppError::catalog(format!("Failed to read name table '{}': {e}", path.display())))?;
        let entries: BTreeMap<String, SkyCoord> = serde_yml::from_str(&text)
            .map_err(|e| AppError::catalog(format!("Invalid name table '{}': {e}", path.display())))?;
        Ok(Self::new(entries))
    }
}

impl NameResolver for TableResolver {
    fn resolve(&self, name: &str) -> Result<SkyCoord, AppError> {
        self.entries
            .get(&normalize(name))
            .copied()
            .ok_or_else(|| AppError::catalog(format!("name '{name}' not found in name table")))
    }
}

fn normalize(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Resolves names (or aliases) to the position of a catalog source.
pub struct CatalogResolver<'a> {
    catalog: &'a dyn SourceCatalog,
}

impl<'a> CatalogResolver<'a> {
    pub fn new(catalog: &'a dyn SourceCatalog) -> Self {
        Self { catalog }
    }
}

impl NameResolver for CatalogResolver<'_> {
    fn resolve(&self, name: &str) -> Result<SkyCoord, AppError> {
        Ok(self.catalog.lookup(name)?.position)
    }
}

/// Online resolver querying the CDS Sesame service.
pub struct SesameResolver {
    client: Client,
    base_url: String,
}

impl SesameResolver {
    pub fn new() -> Result<Self, AppError> {
        Self::with_base_url(SESAME_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(SESAME_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::catalog(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl NameResolver for SesameResolver {
    fn resolve(&self, name: &str) -> Result<SkyCoord, AppError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| AppError::catalog(format!("Invalid resolver URL '{}': {e}", self.base_url)))?;
        url.set_query(Some(name));

        log::debug!("resolving '{name}' via {url}");
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| AppError::catalog(format!("Sesame request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(AppError::catalog(format!(
                "Sesame request failed with status {}.",
                resp.status()
            )));
        }
        let body = resp
            .text()
            .map_err(|e| AppError::catalog(format!("Failed to read Sesame response: {e}")))?;
        parse_sesame(&body).ok_or_else(|| AppError::catalog(format!("Sesame could not resolve '{name}'")))
    }
}

/// Pull the ICRS position out of a Sesame plain-text reply (`%J ra dec ...`).
fn parse_sesame(body: &str) -> Option<SkyCoord> {
    body.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("%J")?;
        let mut parts = rest.split_whitespace();
        let ra = parts.next()?.parse::<f64>().ok()?;
        let dec = parts.next()?.parse::<f64>().ok()?;
        let coord = SkyCoord::icrs(ra, dec);
        coord.is_finite().then_some(coord)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn table_lookup_ignores_case_and_spacing() {
        let r = TableResolver::new([("Vela Junior".to_string(), SkyCoord::icrs(133.0, -46.33))]);
        let c = r.resolve("vela   junior").unwrap();
        assert_eq!(c.lat, -46.33);
        assert_eq!(r.resolve("Crab").unwrap_err().kind(), ErrorKind::CatalogLookup);
    }

    #[test]
    fn catalog_resolver_uses_source_position() {
        use crate::data::catalog::{FileCatalog, SourceRecord};
        use crate::models::SpectralModel;

        let catalog = FileCatalog::new(
            "3FHL",
            vec![SourceRecord {
                name: "3FHL J0851.9-4620e".to_string(),
                aliases: vec!["Vela Junior".to_string()],
                position: SkyCoord::icrs(133.0, -46.33),
                spectral: SpectralModel::power_law(1e-12, 2.0, 1.0),
                spatial: None,
            }],
        );
        let r = CatalogResolver::new(&catalog);
        assert_eq!(r.resolve("Vela Junior").unwrap().lon, 133.0);
    }

    #[test]
    fn parses_sesame_reply() {
        let body = "# RX J0852.0-4622\n#=Simbad: 1\n%@ 1234\n%J 133.0000 -46.3333 = 08 52 00.0 -46 20 00\n";
        let c = parse_sesame(body).unwrap();
        assert_eq!(c.lon, 133.0);
        assert!((c.lat + 46.3333).abs() < 1e-9);
    }

    #[test]
    fn unresolved_sesame_reply_has_no_position() {
        assert!(parse_sesame("# Foo\n#! *** Nothing found ***\n").is_none());
    }
}
