use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::config::{SearchConfig, SourceConfig};
use crate::limiter::RateLimiter;
use crate::parse::parse_record_ids;
use crate::Result;

/// Body NIST sends instead of a JCAMP-DX file when a record has no such spectrum.
pub const SPECTRUM_NOT_FOUND: &[u8] = b"##TITLE=Spectrum not found.\n##END=\n";

/// Body NIST sends instead of a MOL file when a record has no structure.
pub const STRUCTURE_NOT_FOUND: &[u8] = b"NIST    12121112142D 1   1.00000     0.00000\n\
Copyright by the U.S. Sec. Commerce on behalf of U.S.A. All rights reserved.\n\
0  0  0     0  0              1 V2000\n\
M  END\n";

pub type Query = Vec<(&'static str, String)>;

/// The remote endpoint. Every call is one GET against the WebBook CGI.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, query: &Query) -> Result<Vec<u8>>;
}

pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(source: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(source.user_agent.clone())
            .timeout(Duration::from_secs(source.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: source.base_url.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, query: &Query) -> Result<Vec<u8>> {
        let res = self
            .client
            .get(&self.base_url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        let body = res.bytes().await?;
        Ok(body.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum SpectrumType {
    #[serde(rename = "IR")]
    Ir,
    #[serde(rename = "UV")]
    Uv,
    Mass,
}

impl SpectrumType {
    /// Value of the `Type` download parameter, also used in file names.
    pub fn as_str(self) -> &'static str {
        match self {
            SpectrumType::Ir => "IR",
            SpectrumType::Uv => "UV",
            SpectrumType::Mass => "Mass",
        }
    }

    /// Search flag restricting results to records that have this spectrum.
    fn search_flag(self) -> &'static str {
        match self {
            SpectrumType::Ir => "cIR",
            SpectrumType::Uv => "cUV",
            SpectrumType::Mass => "cMS",
        }
    }
}

impl fmt::Display for SpectrumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Structure,
    Spectrum(SpectrumType),
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Structure => f.write_str("mol"),
            ArtifactKind::Spectrum(stype) => write!(f, "{stype}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Saved,
    /// Already on disk, nothing was requested.
    Skipped,
    NotFound,
}

/// Where downloaded artifacts live. A file at its path means "already fetched".
#[derive(Debug, Clone)]
pub struct StorageLayout {
    spectra_dir: PathBuf,
    structure_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(spectra_dir: impl Into<PathBuf>, structure_dir: impl Into<PathBuf>) -> Self {
        Self {
            spectra_dir: spectra_dir.into(),
            structure_dir: structure_dir.into(),
        }
    }

    pub async fn create_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.spectra_dir).await?;
        tokio::fs::create_dir_all(&self.structure_dir).await?;
        Ok(())
    }

    pub fn artifact_path(&self, record_id: &str, kind: ArtifactKind) -> PathBuf {
        match kind {
            ArtifactKind::Structure => self.structure_dir.join(format!("{record_id}.mol")),
            ArtifactKind::Spectrum(stype) => self
                .spectra_dir
                .join(format!("{record_id}-{stype}.jdx")),
        }
    }
}

/// Performs the rate-limited remote calls and stores what they return.
///
/// No retries happen here. Any transport error is handed straight back to the caller.
pub struct Fetcher<T> {
    transport: T,
    limiter: RateLimiter,
    layout: StorageLayout,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, limiter: RateLimiter, layout: StorageLayout) -> Self {
        Self {
            transport,
            limiter,
            layout,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    async fn request(&mut self, query: &Query) -> Result<Vec<u8>> {
        self.limiter.acquire().await;
        self.transport.get(query).await
    }

    /// Searches by formula and returns the matching record ids, possibly none.
    pub async fn search_by_formula(
        &mut self,
        formula: &str,
        options: &SearchConfig,
    ) -> Result<Vec<String>> {
        tracing::info!("Searching: {formula}");
        let body = self.request(&search_query(formula, options)).await?;
        let html = String::from_utf8_lossy(&body).into_owned();
        let ids = parse_record_ids(html).await?;
        tracing::info!("Result: {ids:?}");
        Ok(ids)
    }

    pub async fn fetch_artifact(
        &mut self,
        record_id: &str,
        kind: ArtifactKind,
    ) -> Result<FetchOutcome> {
        let path = self.layout.artifact_path(record_id, kind);
        if tokio::fs::try_exists(&path).await? {
            tracing::info!("{record_id} {kind}: Already exists at {}", path.display());
            return Ok(FetchOutcome::Skipped);
        }

        tracing::info!("{record_id} {kind}: Downloading");
        let (query, sentinel) = match kind {
            ArtifactKind::Structure => (
                vec![("Str2File", record_id.to_owned())],
                STRUCTURE_NOT_FOUND,
            ),
            ArtifactKind::Spectrum(stype) => (
                vec![
                    ("JCAMP", record_id.to_owned()),
                    ("Type", stype.as_str().to_owned()),
                    ("Index", "0".to_owned()),
                ],
                SPECTRUM_NOT_FOUND,
            ),
        };
        let body = self.request(&query).await?;
        if body == sentinel {
            tracing::info!("{record_id} {kind}: Not found");
            return Ok(FetchOutcome::NotFound);
        }

        write_atomically(&path, &body).await?;
        tracing::info!("Saved {}", path.display());
        Ok(FetchOutcome::Saved)
    }
}

fn search_query(formula: &str, options: &SearchConfig) -> Query {
    let mut query = vec![("Formula", formula.to_owned()), ("Units", "SI".to_owned())];
    let flags = [
        ("AllowOther", options.allow_other),
        ("AllowExtra", options.allow_extra),
        ("MatchIso", options.match_isotopes),
        ("NoIon", options.exclude_ions),
    ];
    for (name, on) in flags {
        if on {
            query.push((name, "on".to_owned()));
        }
    }
    for stype in &options.spectrum_types {
        query.push((stype.search_flag(), "on".to_owned()));
    }
    query
}

/// Writes to a `.part` sibling first so an interrupted write never looks like a
/// finished artifact. The data is synced before the rename and the directory entry
/// after it, otherwise a crash can leave an empty file under the final name.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    let mut file = tokio::fs::File::create(&part).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&part, path).await?;

    #[cfg(unix)]
    {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        tokio::fs::File::open(dir).await?.sync_all().await?;
    }
    Ok(())
}
