//! Contract Invariant Tests
//!
//! These tests verify the guarantees callers rely on.

use std::io::Cursor;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use image::{ImageBuffer, ImageFormat, Rgb};

use vehiclepass_core::{
    data_url::DataUrl,
    inspect, validate, Field, MemoryBackend, MemoryTemplate, PermitLayout, PermitPipeline,
    PermitRenderer, PipelineError, RenderError, PlateFont, RecordStore, StorageError, ValidationError,
    VisitorForm, VisitorRecord,
};

const BACKGROUND: [u8; 3] = [240, 200, 120];

fn background_png() -> Vec<u8> {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(800, 1200, Rgb(BACKGROUND));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
    buf
}

fn create_renderer() -> PermitRenderer {
    PermitRenderer::new(
        PermitLayout::default(),
        Arc::new(MemoryTemplate::new(background_png())),
        PlateFont::Builtin,
    )
}

fn create_pipeline() -> PermitPipeline<MemoryBackend> {
    PermitPipeline::new(RecordStore::in_memory(), create_renderer())
}

fn sample_form() -> VisitorForm {
    VisitorForm::new("张三", "技术部", "李四", "浙F12345")
}

fn sample_record(id: &str, day: u32) -> VisitorRecord {
    VisitorRecord {
        id: id.to_string(),
        ..VisitorRecord::from_form(sample_form(), Utc.with_ymd_and_hms(2025, 10, day, 9, 0, 0).unwrap())
    }
}

#[test]
fn invariant_well_formed_input_validates() {
    for plate in ["浙F12345", "京A1234B", "粤BD1234", "沪C1234警"] {
        let form = VisitorForm::new("张三", "技术部", "李四", plate);
        assert!(validate(&form).is_empty(), "{plate} should validate");
    }
}

#[test]
fn invariant_errors_name_exactly_the_failing_fields() {
    let form = VisitorForm::new("", "技术部", " ", "浙F12345");
    let errors = validate(&form);
    assert_eq!(
        errors.keys().copied().collect::<Vec<_>>(),
        vec![Field::ApplicantName, Field::Invitee]
    );

    let all_missing = validate(&VisitorForm::default());
    assert_eq!(all_missing.len(), 4);
}

#[test]
fn invariant_render_dimensions_match_canvas() {
    let renderer = create_renderer();
    let url = renderer.render(&sample_form()).unwrap();
    let info = inspect(&url).unwrap();
    assert_eq!((info.width, info.height), (800, 1200));
    assert!(info.size > 0);
}

#[test]
fn invariant_upsert_idempotent() {
    let mut store = RecordStore::in_memory();
    let record = sample_record("same", 1);
    store.upsert(record.clone()).unwrap();
    store.upsert(record.clone()).unwrap();
    assert_eq!(store.list(), vec![record]);
}

#[test]
fn invariant_delete_removes_record_and_image() {
    let mut store = RecordStore::in_memory();
    store.upsert(sample_record("gone", 1)).unwrap();
    assert!(store.put_image("gone", "data:image/png;base64,AAAA"));

    assert!(store.delete("gone").unwrap());
    assert!(store.get("gone").is_none());
    assert!(store.get_image("gone").is_none());
}

#[test]
fn invariant_empty_search_equals_list() {
    let mut store = RecordStore::in_memory();
    store.upsert(sample_record("a", 1)).unwrap();
    store.upsert(sample_record("b", 2)).unwrap();
    assert_eq!(store.search(""), store.list());
}

#[test]
fn scenario_submit_store_render() {
    let mut pipeline = create_pipeline();
    assert!(pipeline.validate(&sample_form()).is_empty());

    let record = pipeline.submit(sample_form()).unwrap();
    assert_eq!(pipeline.store().list().len(), 1);

    let url = pipeline.permit_image(&record.id).unwrap();
    let info = inspect(&url).unwrap();
    assert_eq!((info.width, info.height), (800, 1200));

    // The plate band must differ from the untouched background.
    let decoded = image::load_from_memory(&DataUrl::parse(&url).unwrap().bytes)
        .unwrap()
        .to_rgb8();
    let plate_row = (1200.0_f32 * 0.47) as u32;
    let band_differs = (plate_row - 30..plate_row + 30)
        .flat_map(|y| (0..800).map(move |x| (x, y)))
        .any(|(x, y)| decoded.get_pixel(x, y).0 != BACKGROUND);
    assert!(band_differs);

    // Far from the plate the background is untouched.
    assert_eq!(decoded.get_pixel(10, 10).0, BACKGROUND);
}

#[test]
fn scenario_bad_plate_never_reaches_store() {
    let mut pipeline = create_pipeline();
    let form = VisitorForm::new("张三", "技术部", "李四", "AB123");

    let errors = pipeline.validate(&form);
    assert!(errors.contains_key(&Field::LicensePlate));

    let err = pipeline.submit(form).unwrap_err();
    assert!(matches!(err, PipelineError::Invalid(_)));
    assert!(pipeline.store().list().is_empty());
}

#[test]
fn scenario_import_missing_id_leaves_store_unchanged() {
    let mut store = RecordStore::in_memory();
    store.upsert(sample_record("keep", 1)).unwrap();
    let before = store.export_snapshot();

    let text = r#"{
        "applications": [
            {"applicantName": "张三", "department": "技术部", "invitee": "李四",
             "licensePlate": "浙F12345", "createdAt": "2025-10-01T09:00:00.000Z"}
        ],
        "images": {}
    }"#;

    let err = store.import_snapshot(text).unwrap_err();
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::MissingField { index: 0, field: "id" })
    ));
    assert_eq!(store.export_snapshot(), before);
}

#[test]
fn invariant_id_and_timestamp_survive_replacement() {
    let mut store = RecordStore::in_memory();
    let original = sample_record("fixed", 3);
    store.upsert(original.clone()).unwrap();

    let replacement = VisitorRecord {
        department: "行政部".to_string(),
        ..original.clone()
    };
    store.upsert(replacement).unwrap();

    let stored = store.get("fixed").unwrap();
    assert_eq!(stored.id, original.id);
    assert_eq!(stored.created_at, original.created_at);
    assert_eq!(stored.department, "行政部");
}

#[test]
fn invariant_render_is_deterministic() {
    let renderer = create_renderer();
    let a = inspect(&renderer.render(&sample_form()).unwrap()).unwrap();
    let b = inspect(&renderer.render(&sample_form()).unwrap()).unwrap();
    assert_eq!(a.sha256, b.sha256);
}

#[test]
fn invariant_undecodable_template_rejected() {
    let renderer = PermitRenderer::new(
        PermitLayout::default(),
        Arc::new(MemoryTemplate::new(Vec::new())),
        PlateFont::Builtin,
    );
    assert!(matches!(
        renderer.render(&sample_form()),
        Err(RenderError::TemplateDecode(_))
    ));
}
