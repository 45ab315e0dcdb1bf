//! End-to-end batch flows over a temporary record store.

use std::fs;
use std::path::Path;

use recat_pipeline::{run_cleanup, run_fix, PipelineConfig};
use recat_store::RecordStore;
use serde_json::{json, Map, Value};
use tempfile::tempdir;

fn write_record(root: &Path, namespace: &str, slug: &str, value: Value) {
    let record: Map<String, Value> = value.as_object().expect("object").clone();
    let store = RecordStore::open(root).expect("open");
    store.write_record(namespace, slug, &record).expect("write");
}

fn read_record(root: &Path, namespace: &str, slug: &str) -> Map<String, Value> {
    RecordStore::open(root)
        .expect("open")
        .read_record(namespace, slug)
        .expect("read")
        .expect("record exists")
}

#[test]
fn missing_store_root_is_fatal() {
    let config = PipelineConfig::new("/no/such/record/store");
    assert!(run_cleanup(&config).is_err());
    assert!(run_fix(&config).is_err());
}

#[test]
fn cleanup_consolidates_aliased_duplicates() {
    let dir = tempdir().expect("tempdir");
    write_record(
        dir.path(),
        "sobha",
        "golf-ridges",
        json!({
            "slug": "golf-ridges",
            "developer": "sobha",
            "images_gallery": [],
            "minPriceAED": 900000,
        }),
    );
    write_record(
        dir.path(),
        "sobha",
        "golf-ridges-at-sobha-one",
        json!({
            "slug": "golf-ridges-at-sobha-one",
            "developer": "sobha",
            "images_gallery": ["1.jpg", "2.jpg", "3.jpg"],
        }),
    );

    let summary = run_cleanup(&PipelineConfig::new(dir.path())).expect("cleanup");
    assert_eq!(summary.merged, 1);
    assert_eq!(summary.removed, 0);

    let store = RecordStore::open(dir.path()).expect("open");
    assert_eq!(
        store.list_entities("sobha").expect("list"),
        vec!["golf-ridges-at-sobha-one"]
    );
    assert!(dir.path().join("_archived/sobha/golf-ridges/index.json").is_file());

    let survivor = read_record(dir.path(), "sobha", "golf-ridges-at-sobha-one");
    assert_eq!(survivor["slug"], "golf-ridges-at-sobha-one");
    assert_eq!(survivor["minPriceAED"], 900000);
    assert_eq!(survivor["images_gallery"], json!(["1.jpg", "2.jpg", "3.jpg"]));
}

#[test]
fn cleanup_promotes_duplicates_without_a_canonical_record() {
    let dir = tempdir().expect("tempdir");
    write_record(
        dir.path(),
        "emaar",
        "silva",
        json!({"slug": "silva", "developer": "emaar", "minPriceAED": 1200000}),
    );

    let summary = run_cleanup(&PipelineConfig::new(dir.path())).expect("cleanup");
    assert_eq!(summary.merged, 1);

    let promoted = read_record(dir.path(), "emaar", "silva-dubai-creek-harbour");
    assert_eq!(promoted["slug"], "silva-dubai-creek-harbour");
    assert_eq!(promoted["minPriceAED"], 1200000);
    assert!(!dir.path().join("emaar/projects/silva").exists());
}

#[test]
fn cleanup_purges_invalid_slugs_and_standardizes_the_rest() {
    let dir = tempdir().expect("tempdir");
    write_record(dir.path(), "damac", "test", json!({"slug": "test"}));
    write_record(
        dir.path(),
        "damac",
        "safa-two",
        json!({
            "slug": "safa-two",
            "galleryImages": ["a.jpg", "b.jpg", "a.jpg"],
            "tour_3d_url": "https://sobha.cloud/",
            "bedrooms": [3, 1, 1, 2],
        }),
    );

    let summary = run_cleanup(&PipelineConfig::new(dir.path())).expect("cleanup");
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.standardized, 1);
    assert!(dir.path().join("_archived/damac/test").is_dir());

    let record = read_record(dir.path(), "damac", "safa-two");
    assert_eq!(record["images_gallery"], json!(["a.jpg", "b.jpg"]));
    assert_eq!(record["image_hero"], "a.jpg");
    assert_eq!(record["bedrooms"], json!([1, 2, 3]));
    assert!(!record.contains_key("galleryImages"));
    assert!(!record.contains_key("tour_3d_url"));
    assert!(!record.contains_key("3D_TourLink"));
}

#[test]
fn cleanup_skips_malformed_records_without_aborting() {
    let dir = tempdir().expect("tempdir");
    let broken = dir.path().join("nakheel/projects/broken");
    fs::create_dir_all(&broken).expect("mkdir");
    fs::write(broken.join("index.json"), "{nope").expect("write");
    write_record(
        dir.path(),
        "nakheel",
        "palm-beach-towers",
        json!({"slug": "palm-beach-towers", "bedrooms": [2, 2, 1]}),
    );

    let summary = run_cleanup(&PipelineConfig::new(dir.path())).expect("cleanup");
    assert_eq!(summary.standardized, 1);

    let record = read_record(dir.path(), "nakheel", "palm-beach-towers");
    assert_eq!(record["bedrooms"], json!([1, 2]));
}

#[test]
fn fix_enriches_from_the_namespace_candidate_document() {
    let dir = tempdir().expect("tempdir");
    write_record(
        dir.path(),
        "sobha",
        "golf-ridges-at-sobha-one",
        json!({
            "slug": "golf-ridges-at-sobha-one",
            "developer": "sobha",
            "name_en": "Golf Ridges",
        }),
    );
    fs::write(
        dir.path().join("sobha.md"),
        r#"<script id="__NEXT_DATA__" type="application/json">
        {"props":{"pageProps":{"devResult":{"projects":{"data":[
            {"title":"golf ridges",
             "startingPrice":1500000,
             "paymentPlans":["60/40"],
             "deliveryDate":"2027-06-30T00:00:00Z",
             "bedrooms":["1","2","3"],
             "images":["https://cdn.example/p/9/medium.webp"]}
        ]}}}}}
        </script>"#,
    )
    .expect("write doc");

    let summary = run_fix(&PipelineConfig::new(dir.path())).expect("fix");
    assert_eq!(summary.fixed, 1);
    assert_eq!(summary.archived, 0);

    let record = read_record(dir.path(), "sobha", "golf-ridges-at-sobha-one");
    assert_eq!(record["projectName"], json!({"en": "Golf Ridges", "ar": "Golf Ridges"}));
    assert_eq!(record["minPriceAED"], 1500000);
    assert_eq!(record["paymentPlan"], "60/40");
    assert_eq!(record["deliveryDate"], "2027-06-30");
    assert_eq!(record["bedrooms"], json!([1, 2, 3]));
    assert_eq!(
        record["images_gallery"],
        json!(["https://cdn.example/p/9/original.webp"])
    );
    assert_eq!(record["heroImage"], "https://cdn.example/p/9/original.webp");
}

#[test]
fn fix_archives_nameless_records_regardless_of_content() {
    let dir = tempdir().expect("tempdir");
    write_record(
        dir.path(),
        "binghatti",
        "mystery",
        json!({
            "slug": "mystery",
            "minPriceAED": 2000000,
            "images_gallery": ["full.jpg"],
            "description": {"en": "plenty of content, no name"},
        }),
    );
    write_record(
        dir.path(),
        "binghatti",
        "binghatti-flare",
        json!({"slug": "binghatti-flare", "name_ar": "بن غاطي فلير"}),
    );

    let summary = run_fix(&PipelineConfig::new(dir.path())).expect("fix");
    assert_eq!(summary.archived, 1);
    assert_eq!(summary.fixed, 1);
    assert!(dir.path().join("_archived/binghatti/mystery/index.json").is_file());

    let store = RecordStore::open(dir.path()).expect("open");
    assert_eq!(
        store.list_entities("binghatti").expect("list"),
        vec!["binghatti-flare"]
    );
}

#[test]
fn fix_without_candidate_documents_still_synthesizes_fields() {
    let dir = tempdir().expect("tempdir");
    write_record(
        dir.path(),
        "emaar",
        "valo-at-dubai-creek-harbour",
        json!({
            "slug": "valo-at-dubai-creek-harbour",
            "name_en": "Valo",
            "city_en": "Dubai",
            "images_gallery": ["v1.jpg", "v1.jpg"],
        }),
    );

    let summary = run_fix(&PipelineConfig::new(dir.path())).expect("fix");
    assert_eq!(summary.fixed, 1);

    let record = read_record(dir.path(), "emaar", "valo-at-dubai-creek-harbour");
    assert_eq!(record["projectName"], json!({"en": "Valo", "ar": "Valo"}));
    assert_eq!(record["location"], json!({"en": "Dubai", "ar": "Dubai"}));
    assert_eq!(record["images_gallery"], json!(["v1.jpg"]));
    assert_eq!(record["galleryImages"], json!(["v1.jpg"]));
    assert_eq!(record["heroImage"], "v1.jpg");
}
