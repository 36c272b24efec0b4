use async_trait::async_trait;
use galleryrs::core::archive::MANIFEST_ENTRY;
use galleryrs::core::definition::{CropGeometry, FitMode, ItemDefinition, Offset, Size};
use galleryrs::services::fetch::{FetchError, Fetcher};
use galleryrs::{GalleryConfig, GalleryPipeline};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::collections::{BTreeSet, HashMap};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zip::ZipArchive;

/// Serves sources from memory, optionally slowly, tracking peak concurrency.
#[derive(Default)]
struct MemoryFetcher {
    sources: HashMap<String, Vec<u8>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryFetcher {
    fn with(mut self, id: &str, bytes: Vec<u8>) -> Self {
        self.sources.insert(source_of(id), bytes);
        self
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.sources
            .get(source)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                source_ref: source.to_string(),
            })
    }
}

#[derive(Clone, Copy)]
enum Pattern {
    Checker,
    Stripes,
    Halves,
    Quadrants,
}

/// Block patterns aligned to the fingerprint grid, so the same pattern at
/// different resolutions hashes identically and different patterns do not.
fn image_bytes(pattern: Pattern, width: u32, height: u32) -> Vec<u8> {
    let image = GrayImage::from_fn(width, height, |x, y| {
        let (cx, cy) = (x * 8 / width, y * 8 / height);
        let on = match pattern {
            Pattern::Checker => (cx + cy) % 2 == 0,
            Pattern::Stripes => cy % 2 == 0,
            Pattern::Halves => cx < 4,
            Pattern::Quadrants => (cx < 4) == (cy < 4),
        };
        Luma([if on { 255 } else { 0 }])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn source_of(id: &str) -> String {
    format!("mem://{id}")
}

fn definition(id: &str) -> ItemDefinition {
    ItemDefinition {
        md5: id.to_string(),
        source: source_of(id),
        full: CropGeometry {
            offset: Offset::default(),
            scale: 1.0,
            final_size: Size { width: 64, height: 64 },
            fit: FitMode::Stretch,
        },
        tags: vec!["portrait".to_string()],
        requeried: true,
        extra: Default::default(),
    }
}

struct Sealed {
    entries: BTreeSet<String>,
    manifest: Vec<ItemDefinition>,
}

fn open(bytes: &[u8]) -> Sealed {
    let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let entries = archive
        .file_names()
        .filter(|name| *name != MANIFEST_ENTRY)
        .map(String::from)
        .collect();
    let mut json = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .unwrap()
        .read_to_string(&mut json)
        .unwrap();
    Sealed {
        entries,
        manifest: serde_json::from_str(&json).unwrap(),
    }
}

fn assert_consistent(sealed: &Sealed) {
    let expected: BTreeSet<String> = sealed
        .manifest
        .iter()
        .map(|d| format!("{}.jpg", d.md5))
        .collect();
    assert_eq!(sealed.entries, expected);
}

async fn build(fetcher: MemoryFetcher, definitions: Vec<ItemDefinition>) -> galleryrs::GalleryOutput {
    GalleryPipeline::new(GalleryConfig::default(), Arc::new(fetcher))
        .unwrap()
        .run(definitions)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_near_duplicate_with_smaller_area_is_removed() {
    let fetcher = MemoryFetcher::default()
        .with("aaaa", image_bytes(Pattern::Checker, 128, 128))
        .with("bbbb", image_bytes(Pattern::Checker, 64, 64))
        .with("cccc", image_bytes(Pattern::Stripes, 64, 64));

    let output = build(
        fetcher,
        vec![definition("bbbb"), definition("aaaa"), definition("cccc")],
    )
    .await;
    let sealed = open(&output.bytes);

    let ids: Vec<&str> = sealed.manifest.iter().map(|d| d.md5.as_str()).collect();
    assert_eq!(ids, vec!["aaaa", "cccc"]);
    assert!(!sealed.entries.contains("bbbb.jpg"));
    assert_consistent(&sealed);

    assert_eq!(output.duplicates.pair_count(), 1);
    assert_eq!(output.duplicates.clusters["aaaa"][0].identifier, "bbbb");
    assert!(output.failed.is_empty());
}

#[tokio::test]
async fn test_one_undecodable_item_does_not_affect_the_rest() {
    let fetcher = MemoryFetcher::default()
        .with("p1", image_bytes(Pattern::Checker, 64, 64))
        .with("p2", image_bytes(Pattern::Stripes, 64, 64))
        .with("p3", image_bytes(Pattern::Halves, 64, 64))
        .with("p4", image_bytes(Pattern::Quadrants, 64, 64))
        .with("p5", b"\x89PNG but not really".to_vec());
    let definitions = ["p1", "p2", "p3", "p4", "p5"].map(definition).to_vec();

    let output = build(fetcher, definitions).await;
    let sealed = open(&output.bytes);

    assert_eq!(sealed.manifest.len(), 4);
    assert_eq!(sealed.entries.len(), 4);
    assert!(!sealed.entries.contains("p5.jpg"));
    assert_consistent(&sealed);

    assert_eq!(output.failed.len(), 1);
    assert_eq!(output.failed[0].identifier, "p5");
    assert!(output.failed[0].reason.starts_with("Decode error"));
}

#[tokio::test]
async fn test_manifest_preserves_input_order_and_fields() {
    let fetcher = MemoryFetcher::default()
        .with("zz", image_bytes(Pattern::Halves, 64, 64))
        .with("aa", image_bytes(Pattern::Stripes, 64, 64))
        .with("mm", image_bytes(Pattern::Checker, 64, 64));
    let mut first = definition("zz");
    first
        .extra
        .insert("small".to_string(), serde_json::json!({ "scale": 2 }));

    let output = build(fetcher, vec![first.clone(), definition("aa"), definition("mm")]).await;
    let sealed = open(&output.bytes);

    let ids: Vec<&str> = sealed.manifest.iter().map(|d| d.md5.as_str()).collect();
    assert_eq!(ids, vec!["zz", "aa", "mm"]);
    assert_eq!(sealed.manifest[0], first);
    assert_eq!(output.manifest, sealed.manifest);
}

#[tokio::test]
async fn test_every_failure_kind_keeps_archive_consistent() {
    let fetcher = MemoryFetcher::default()
        .with("good", image_bytes(Pattern::Checker, 64, 64))
        .with("dupe", image_bytes(Pattern::Checker, 32, 32))
        .with("junk", vec![0u8; 16]);
    let mut tiny = definition("tiny");
    tiny.full.final_size = Size { width: 3, height: 3 };
    let fetcher = fetcher.with("tiny", image_bytes(Pattern::Stripes, 32, 32));

    let output = build(
        fetcher,
        vec![
            definition("good"),
            definition("dupe"),
            definition("junk"),
            definition("missing"),
            definition(""),
            tiny,
        ],
    )
    .await;
    let sealed = open(&output.bytes);

    assert_consistent(&sealed);
    let ids: Vec<&str> = sealed.manifest.iter().map(|d| d.md5.as_str()).collect();
    assert_eq!(ids, vec!["good"]);

    let discarded: Vec<String> = output.discarded_identifiers().into_iter().collect();
    assert_eq!(discarded, vec!["dupe", "junk", "missing", "tiny"]);
}

#[tokio::test]
async fn test_empty_input_yields_manifest_only_archive() {
    let output = build(MemoryFetcher::default(), Vec::new()).await;
    let sealed = open(&output.bytes);

    assert!(sealed.entries.is_empty());
    assert!(sealed.manifest.is_empty());
}

#[tokio::test]
async fn test_in_flight_fetches_respect_concurrency_limit() {
    let mut fetcher = MemoryFetcher {
        delay: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let patterns = [Pattern::Checker, Pattern::Stripes, Pattern::Halves, Pattern::Quadrants];
    let mut definitions = Vec::new();
    for i in 0..8 {
        let id = format!("item{i}");
        fetcher
            .sources
            .insert(source_of(&id), image_bytes(patterns[i % 4], 64, 64));
        definitions.push(definition(&id));
    }
    let fetcher = Arc::new(fetcher);

    let mut config = GalleryConfig::default();
    config.concurrency = 2;
    let output = GalleryPipeline::new(config, Arc::clone(&fetcher) as Arc<dyn Fetcher>)
        .unwrap()
        .run(definitions)
        .await
        .unwrap();

    assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
    assert!(fetcher.peak.load(Ordering::SeqCst) >= 1);
    // Four distinct patterns, two copies each at equal area: the smaller id survives.
    let ids: Vec<&str> = output.manifest.iter().map(|d| d.md5.as_str()).collect();
    assert_eq!(ids, vec!["item0", "item1", "item2", "item3"]);
    assert_consistent(&open(&output.bytes));
}
