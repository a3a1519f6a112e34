use super::*;
use crate::analysis::LoadOrderIssueType;
use std::collections::HashMap;
use std::io::Write;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use zip::write::SimpleFileOptions;

/// Minimal HTTP file server backed by a path -> body map.
async fn spawn_file_server(files: HashMap<String, Vec<u8>>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let files = Arc::new(files);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let files = files.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut total = 0;
                loop {
                    match stream.read(&mut buf[total..]).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            total += n;
                            if buf[..total].windows(4).any(|w| w == b"\r\n\r\n")
                                || total == buf.len()
                            {
                                break;
                            }
                        }
                    }
                }

                let request = String::from_utf8_lossy(&buf[..total]);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                let response = match files.get(&path) {
                    Some(body) => {
                        let mut r = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/zip\r\nConnection: close\r\n\r\n",
                            body.len()
                        )
                        .into_bytes();
                        r.extend_from_slice(body);
                        r
                    }
                    None => {
                        b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_vec()
                    }
                };
                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}

fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default();
        for (name, body) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// TES4 plugin bytes with the given flags and MAST entries.
fn build_plugin(flags: u32, masters: &[&str]) -> Vec<u8> {
    let mut body = Vec::new();
    // HEDR
    body.extend_from_slice(b"HEDR");
    body.extend_from_slice(&12u16.to_le_bytes());
    body.extend_from_slice(&1.7f32.to_le_bytes());
    body.extend_from_slice(&10u32.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    for master in masters {
        let mut name = master.as_bytes().to_vec();
        name.push(0);
        body.extend_from_slice(b"MAST");
        body.extend_from_slice(&(name.len() as u16).to_le_bytes());
        body.extend_from_slice(&name);
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"TES4");
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&44u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&body);
    out
}

struct StubRegistry {
    details: RevisionDetails,
    links: HashMap<(i64, i64), Vec<DownloadLink>>,
    link_error: Option<fn() -> Error>,
}

impl StubRegistry {
    fn new(details: RevisionDetails) -> Self {
        Self {
            details,
            links: HashMap::new(),
            link_error: None,
        }
    }

    fn with_link(mut self, mod_id: i64, file_id: i64, uri: &str) -> Self {
        self.links.insert(
            (mod_id, file_id),
            vec![DownloadLink {
                name: "CDN".into(),
                short_name: "cdn".into(),
                uri: uri.to_string(),
            }],
        );
        self
    }
}

#[async_trait]
impl Registry for StubRegistry {
    async fn get_collection(&self, slug: &str, _cancel: &CancelToken) -> Result<Collection> {
        Err(Error::NotFound(format!("collection {}", slug)))
    }

    async fn get_revisions(&self, _slug: &str, _cancel: &CancelToken) -> Result<Vec<Revision>> {
        Ok(Vec::new())
    }

    async fn get_revision_mods(
        &self,
        _slug: &str,
        _revision: u32,
        _cancel: &CancelToken,
    ) -> Result<RevisionDetails> {
        Ok(self.details.clone())
    }

    async fn get_download_links(
        &self,
        _game_domain: &str,
        mod_id: i64,
        file_id: i64,
        _cancel: &CancelToken,
    ) -> Result<Vec<DownloadLink>> {
        if let Some(make_error) = self.link_error {
            return Err(make_error());
        }
        Ok(self.links.get(&(mod_id, file_id)).cloned().unwrap_or_default())
    }

    async fn validate_credential(&self, _cancel: &CancelToken) -> Result<bool> {
        Ok(true)
    }
}

fn mod_file(mod_id: i64, file_id: i64, name: &str, optional: bool) -> ModFileRef {
    ModFileRef {
        game_domain: "skyrimspecialedition".into(),
        mod_id,
        file_id,
        name: name.into(),
        version: None,
        size_bytes: 0,
        optional,
    }
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    }
}

fn engine(config: &Config, registry: StubRegistry) -> Engine {
    let cache = Arc::new(Cache::open(&config.cache_path()).unwrap());
    Engine::new(config, Arc::new(registry), cache).unwrap()
}

fn assert_scratch_empty(config: &Config) {
    for root in [config.downloads_dir(), config.extracted_dir()] {
        let leftover: Vec<_> = std::fs::read_dir(&root)
            .map(|entries| entries.filter_map(|e| e.ok()).collect())
            .unwrap_or_default();
        assert!(
            leftover.is_empty(),
            "scratch root {} not empty: {:?}",
            root.display(),
            leftover.iter().map(|e| e.path()).collect::<Vec<_>>()
        );
    }
}

#[tokio::test]
async fn test_fomod_pipeline_parses_and_caches() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let archive = build_zip(&[(
        "fomod/ModuleConfig.xml",
        br#"<config><moduleName>Pipeline Mod</moduleName></config>"#.as_slice(),
    )]);
    let base = spawn_file_server(HashMap::from([("/mod.zip".to_string(), archive)])).await;

    let registry = StubRegistry::new(RevisionDetails {
        revision_number: 1,
        mod_files: vec![],
    })
    .with_link(7, 42, &format!("{}/mod.zip", base));

    let engine = engine(&config, registry);
    let cancel = CancelToken::new();

    let first = engine
        .analyze_fomod(&cancel, "skyrimspecialedition", 7, 42)
        .await
        .unwrap();
    assert!(first.has_fomod);
    assert!(!first.cached);
    assert_eq!(first.data.as_ref().unwrap().module_name, "Pipeline Mod");
    assert_scratch_empty(&config);

    let second = engine
        .analyze_fomod(&cancel, "skyrimspecialedition", 7, 42)
        .await
        .unwrap();
    assert!(second.cached);
    assert_eq!(second.data.unwrap().module_name, "Pipeline Mod");
}

#[tokio::test]
async fn test_fomod_absent_is_cached_short_circuit() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let archive = build_zip(&[("meshes/sword.nif", b"nif".as_slice())]);
    let base = spawn_file_server(HashMap::from([("/plain.zip".to_string(), archive)])).await;

    let registry = StubRegistry::new(RevisionDetails {
        revision_number: 1,
        mod_files: vec![],
    })
    .with_link(1, 1, &format!("{}/plain.zip", base));

    let engine = engine(&config, registry);
    let cancel = CancelToken::new();

    let first = engine
        .analyze_fomod(&cancel, "skyrimspecialedition", 1, 1)
        .await
        .unwrap();
    assert!(!first.has_fomod);
    assert!(first.data.is_none());

    let second = engine
        .analyze_fomod(&cancel, "skyrimspecialedition", 1, 1)
        .await
        .unwrap();
    assert!(!second.has_fomod);
    assert!(second.cached);
    assert_scratch_empty(&config);
}

#[tokio::test]
async fn test_load_order_pipeline() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let base_game = build_zip(&[("Skyrim.esm", build_plugin(1, &[]).as_slice())]);
    let my_mod = build_zip(&[(
        "MyMod.esp",
        build_plugin(0, &["Skyrim.esm", "Update.esm"]).as_slice(),
    )]);

    let base = spawn_file_server(HashMap::from([
        ("/base.zip".to_string(), base_game),
        ("/mymod.zip".to_string(), my_mod),
    ]))
    .await;

    let registry = StubRegistry::new(RevisionDetails {
        revision_number: 3,
        mod_files: vec![
            mod_file(1, 10, "Base Game", false),
            mod_file(2, 20, "My Mod", false),
            // Optional entries are not downloaded; no link is registered.
            mod_file(3, 30, "Optional Extra", true),
        ],
    })
    .with_link(1, 10, &format!("{}/base.zip", base))
    .with_link(2, 20, &format!("{}/mymod.zip", base));

    let engine = engine(&config, registry);
    let cancel = CancelToken::new();

    let analysis = engine.analyze_load_order(&cancel, "my-collection", 3).await.unwrap();

    assert_eq!(analysis.slug, "my-collection");
    assert_eq!(analysis.report.stats.total_plugins, 2);
    assert_eq!(analysis.report.issues.len(), 1);
    let issue = &analysis.report.issues[0];
    assert_eq!(issue.issue_type, LoadOrderIssueType::MissingMaster);
    assert_eq!(issue.plugin, "MyMod.esp");
    assert_eq!(issue.related_plugin.as_deref(), Some("Update.esm"));
    assert_scratch_empty(&config);

    let cached = engine.analyze_load_order(&cancel, "my-collection", 3).await.unwrap();
    assert!(cached.cached);
}

#[tokio::test]
async fn test_conflict_pipeline_identical_duplicate() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let body = b"identical texture bytes";
    let mod_a = build_zip(&[("textures/shared.dds", body.as_slice())]);
    let mod_b = build_zip(&[("Textures\\Shared.DDS", body.as_slice())]);

    let base = spawn_file_server(HashMap::from([
        ("/a.zip".to_string(), mod_a),
        ("/b.zip".to_string(), mod_b),
    ]))
    .await;

    let registry = StubRegistry::new(RevisionDetails {
        revision_number: 9,
        mod_files: vec![mod_file(100, 1, "Mod A", false), mod_file(200, 2, "Mod B", false)],
    })
    .with_link(100, 1, &format!("{}/a.zip", base))
    .with_link(200, 2, &format!("{}/b.zip", base));

    let engine = engine(&config, registry);
    let cancel = CancelToken::new();

    let analysis = engine
        .analyze_conflicts(&cancel, "my-collection", 9, true)
        .await
        .unwrap();

    assert_eq!(analysis.report.conflicts.len(), 1);
    let conflict = &analysis.report.conflicts[0];
    assert_eq!(conflict.path, "textures/shared.dds");
    assert!(conflict.is_identical);
    assert_eq!(conflict.winner.mod_id, "200");
    assert_eq!(conflict.losers[0].mod_id, "100");
    assert_eq!(analysis.report.stats.identical_conflicts, 1);
    assert_scratch_empty(&config);

    // Hash-free analysis caches under its own key and cannot see identity.
    let without_hashes = engine
        .analyze_conflicts(&cancel, "my-collection", 9, false)
        .await
        .unwrap();
    assert!(!without_hashes.cached);
    assert!(!without_hashes.report.conflicts[0].is_identical);
}

#[tokio::test]
async fn test_pipeline_cancelled_before_io() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let registry = StubRegistry::new(RevisionDetails {
        revision_number: 1,
        mod_files: vec![],
    });
    let engine = engine(&config, registry);

    let cancel = CancelToken::new();
    cancel.cancel();

    let err = engine
        .analyze_fomod(&cancel, "skyrimspecialedition", 1, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn test_premium_required_forwarded_verbatim() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let mut registry = StubRegistry::new(RevisionDetails {
        revision_number: 1,
        mod_files: vec![mod_file(1, 1, "Paywalled", false)],
    });
    registry.link_error = Some(|| Error::PremiumRequired);

    let engine = engine(&config, registry);
    let cancel = CancelToken::new();

    let err = engine
        .analyze_load_order(&cancel, "c", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PremiumRequired));
    assert_scratch_empty(&config);
}

#[tokio::test]
async fn test_missing_url_rejected() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    // Link lookup succeeds but yields no URLs.
    let registry = StubRegistry::new(RevisionDetails {
        revision_number: 1,
        mod_files: vec![],
    });

    let engine = engine(&config, registry);
    let cancel = CancelToken::new();

    let err = engine
        .analyze_fomod(&cancel, "skyrimspecialedition", 5, 5)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoUrl));
}

#[tokio::test]
async fn test_download_failure_names_offending_mod() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    // The URL points at a closed port, so the download itself fails.
    let registry = StubRegistry::new(RevisionDetails {
        revision_number: 1,
        mod_files: vec![mod_file(1, 1, "Unreachable Mod", false)],
    })
    .with_link(1, 1, "http://127.0.0.1:9/gone.zip");

    let engine = engine(&config, registry);
    let cancel = CancelToken::new();

    let err = engine.analyze_conflicts(&cancel, "c", 1, false).await.unwrap_err();
    match err {
        Error::DownloadFailed(msg) => assert!(msg.contains("Unreachable Mod")),
        other => panic!("expected DownloadFailed, got {:?}", other),
    }
    assert_scratch_empty(&config);
}

#[tokio::test]
async fn test_unparseable_plugin_degrades_to_filename() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let archive = build_zip(&[
        ("Good.esp", build_plugin(0, &[]).as_slice()),
        ("Broken.esp", b"not a plugin at all".as_slice()),
    ]);
    let base = spawn_file_server(HashMap::from([("/mods.zip".to_string(), archive)])).await;

    let registry = StubRegistry::new(RevisionDetails {
        revision_number: 1,
        mod_files: vec![mod_file(1, 1, "Mixed Mod", false)],
    })
    .with_link(1, 1, &format!("{}/mods.zip", base));

    let engine = engine(&config, registry);
    let cancel = CancelToken::new();

    let analysis = engine.analyze_load_order(&cancel, "c", 1).await.unwrap();
    assert_eq!(analysis.report.stats.total_plugins, 2);

    let broken = analysis
        .report
        .plugins
        .iter()
        .find(|p| p.filename == "Broken.esp")
        .unwrap();
    assert!(broken.masters.is_empty());
}
