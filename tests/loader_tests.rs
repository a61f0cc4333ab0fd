use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};
use dicom_volume_render::{SortBy, VolumeLoader, VolumeLoaderError};

const ROWS: u16 = 3;
const COLUMNS: u16 = 4;

fn strs(values: &[&str]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|v| v.to_string()).collect())
}

/// Single-frame 16-bit CT slice filled with `value`.
struct SliceOptions<'a> {
    instance: i32,
    position_z: Option<&'a str>,
    value: u16,
    rows: u16,
    pixel_spacing: Option<[&'a str; 2]>,
    slice_thickness: Option<&'a str>,
    table_position: Option<&'a str>,
    rescale_intercept: Option<&'a str>,
}

impl Default for SliceOptions<'_> {
    fn default() -> Self {
        Self {
            instance: 1,
            position_z: Some("0"),
            value: 0,
            rows: ROWS,
            pixel_spacing: Some(["0.5", "0.7"]),
            slice_thickness: None,
            table_position: None,
            rescale_intercept: None,
        }
    }
}

fn ct_slice(options: SliceOptions) -> FileDicomObject<InMemDicomObject> {
    let pixels = usize::from(options.rows) * usize::from(COLUMNS);
    let pixel_bytes: Vec<u8> = std::iter::repeat_n(options.value.to_le_bytes(), pixels)
        .flatten()
        .collect();
    let sop_instance_uid = format!("1.2.826.0.1.3680043.2.1125.{}", options.instance);

    let mut elements = vec![
        DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(uids::CT_IMAGE_STORAGE),
        ),
        DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(sop_instance_uid.as_str()),
        ),
        DataElement::new(
            tags::INSTANCE_NUMBER,
            VR::IS,
            PrimitiveValue::from(options.instance.to_string()),
        ),
        DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
        DataElement::new(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            PrimitiveValue::from("MONOCHROME2"),
        ),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(options.rows)),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(COLUMNS)),
        DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
        DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
        DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(pixel_bytes)),
    ];
    if let Some(z) = options.position_z {
        elements.push(DataElement::new(
            tags::IMAGE_POSITION_PATIENT,
            VR::DS,
            strs(&["0", "0", z]),
        ));
    }
    if let Some(spacing) = options.pixel_spacing {
        elements.push(DataElement::new(tags::PIXEL_SPACING, VR::DS, strs(&spacing)));
    }
    if let Some(thickness) = options.slice_thickness {
        elements.push(DataElement::new(
            tags::SLICE_THICKNESS,
            VR::DS,
            strs(&[thickness]),
        ));
    }
    if let Some(table) = options.table_position {
        let table: f64 = table.parse().expect("table position should be numeric");
        elements.push(DataElement::new(
            tags::TABLE_POSITION,
            VR::FD,
            PrimitiveValue::from(table),
        ));
    }
    if let Some(intercept) = options.rescale_intercept {
        elements.push(DataElement::new(
            tags::RESCALE_INTERCEPT,
            VR::DS,
            strs(&[intercept]),
        ));
        elements.push(DataElement::new(tags::RESCALE_SLOPE, VR::DS, strs(&["1"])));
    }

    InMemDicomObject::from_element_iter(elements)
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(sop_instance_uid),
        )
        .expect("should build file meta group")
}

fn series() -> Vec<FileDicomObject<InMemDicomObject>> {
    // deliberately out of order
    [(2, "2.5", 200), (1, "0", 100), (3, "5", 300)]
        .into_iter()
        .map(|(instance, z, value)| {
            ct_slice(SliceOptions {
                instance,
                position_z: Some(z),
                value,
                ..SliceOptions::default()
            })
        })
        .collect()
}

#[test]
fn slices_are_stacked_by_image_position() {
    let volume = VolumeLoader::new(SortBy::ImagePositionPatient)
        .load_from_dicom_objects(&series())
        .unwrap();

    assert_eq!(volume.dim(), (3, ROWS as usize, COLUMNS as usize));
    // highest position first
    assert_eq!(volume.data()[[0, 0, 0]], 300.0);
    assert_eq!(volume.data()[[1, 2, 3]], 200.0);
    assert_eq!(volume.data()[[2, 1, 1]], 100.0);

    let (sx, sy, sz) = volume.spacing();
    assert!((sx - 0.7).abs() < 1e-6);
    assert!((sy - 0.5).abs() < 1e-6);
    assert!((sz - 2.5).abs() < 1e-6);
}

#[test]
fn slices_are_stacked_by_instance_number() {
    let volume = VolumeLoader::new(SortBy::InstanceNumber)
        .load_from_dicom_objects(&series())
        .unwrap();
    let firsts: Vec<f32> = (0..3).map(|z| volume.data()[[z, 0, 0]]).collect();
    assert_eq!(firsts, vec![100.0, 200.0, 300.0]);
}

#[test]
fn slices_are_stacked_by_table_position() {
    let objects: Vec<_> = [(1, "20", 100), (2, "-10", 200), (3, "5", 300)]
        .into_iter()
        .map(|(instance, table, value)| {
            ct_slice(SliceOptions {
                instance,
                value,
                table_position: Some(table),
                slice_thickness: Some("2"),
                ..SliceOptions::default()
            })
        })
        .collect();

    let volume = VolumeLoader::new(SortBy::TablePosition)
        .load_from_dicom_objects(&objects)
        .unwrap();
    let firsts: Vec<f32> = (0..3).map(|z| volume.data()[[z, 0, 0]]).collect();
    assert_eq!(firsts, vec![200.0, 300.0, 100.0]);
    // every slice sits at z = 0, so thickness gives the spacing
    assert_eq!(volume.spacing().2, 2.0);
}

#[test]
fn slices_without_table_position_are_skipped() {
    let mut objects = vec![ct_slice(SliceOptions {
        table_position: Some("0"),
        ..SliceOptions::default()
    })];
    objects.push(ct_slice(SliceOptions {
        instance: 2,
        ..SliceOptions::default()
    }));
    let volume = VolumeLoader::new(SortBy::TablePosition)
        .load_from_dicom_objects(&objects)
        .unwrap();
    assert_eq!(volume.dim().0, 1);
}

#[test]
fn stored_values_are_kept_unless_rescaling() {
    let objects = vec![ct_slice(SliceOptions {
        value: 1424,
        rescale_intercept: Some("-1024"),
        ..SliceOptions::default()
    })];

    let stored = VolumeLoader::new(SortBy::InstanceNumber)
        .load_from_dicom_objects(&objects)
        .unwrap();
    assert_eq!(stored.data()[[0, 0, 0]], 1424.0);

    let hounsfield = VolumeLoader::new(SortBy::InstanceNumber)
        .with_rescale(true)
        .load_from_dicom_objects(&objects)
        .unwrap();
    assert!((hounsfield.data()[[0, 0, 0]] - 400.0).abs() < 1e-3);
}

#[test]
fn single_slice_without_thickness_uses_unit_spacing() {
    let volume = VolumeLoader::new(SortBy::None)
        .load_from_dicom_objects(&[ct_slice(SliceOptions::default())])
        .unwrap();
    assert_eq!(volume.spacing().2, 1.0);
}

#[test]
fn mismatched_slice_sizes_are_rejected() {
    let objects = vec![
        ct_slice(SliceOptions::default()),
        ct_slice(SliceOptions {
            instance: 2,
            position_z: Some("1"),
            rows: ROWS + 1,
            ..SliceOptions::default()
        }),
    ];
    let result = VolumeLoader::new(SortBy::ImagePositionPatient).load_from_dicom_objects(&objects);
    assert!(matches!(result, Err(VolumeLoaderError::InconsistentDimensions)));
}

#[test]
fn missing_pixel_spacing_is_rejected() {
    let objects = vec![ct_slice(SliceOptions {
        pixel_spacing: None,
        ..SliceOptions::default()
    })];
    let result = VolumeLoader::new(SortBy::InstanceNumber).load_from_dicom_objects(&objects);
    assert!(matches!(result, Err(VolumeLoaderError::MissingSpacing)));
}

#[test]
fn slices_without_sort_key_are_skipped() {
    let mut objects = series();
    objects.push(ct_slice(SliceOptions {
        instance: 4,
        position_z: None,
        value: 999,
        ..SliceOptions::default()
    }));
    let volume = VolumeLoader::new(SortBy::ImagePositionPatient)
        .load_from_dicom_objects(&objects)
        .unwrap();
    assert_eq!(volume.dim().0, 3);
}

#[test]
fn spacing_comes_from_kept_slices_only() {
    // the skipped object comes first and disagrees on every spacing
    let mut objects = vec![ct_slice(SliceOptions {
        instance: 9,
        position_z: None,
        pixel_spacing: Some(["9", "9"]),
        slice_thickness: Some("3"),
        ..SliceOptions::default()
    })];
    objects.push(ct_slice(SliceOptions::default()));

    let volume = VolumeLoader::new(SortBy::ImagePositionPatient)
        .load_from_dicom_objects(&objects)
        .unwrap();
    assert_eq!(volume.dim().0, 1);
    let (sx, sy, sz) = volume.spacing();
    assert!((sx - 0.7).abs() < 1e-6);
    assert!((sy - 0.5).abs() < 1e-6);
    assert_eq!(sz, 1.0);
}

#[test]
fn directory_series_ignores_other_files() {
    let dir = tempfile::tempdir().unwrap();
    for (i, object) in series().iter().enumerate() {
        object
            .write_to_file(dir.path().join(format!("vhm.{}", 1001 + i)))
            .unwrap();
    }
    std::fs::write(dir.path().join("README.txt"), "not a slice").unwrap();

    let volume = VolumeLoader::new(SortBy::ImagePositionPatient)
        .load_from_directory(dir.path())
        .unwrap();
    assert_eq!(volume.dim(), (3, ROWS as usize, COLUMNS as usize));
    assert_eq!(volume.data()[[0, 0, 0]], 300.0);
}

#[test]
fn directory_series_skips_unreadable_candidates() {
    let dir = tempfile::tempdir().unwrap();
    for (i, object) in series().iter().enumerate() {
        object
            .write_to_file(dir.path().join(format!("vhm.{}", 1001 + i)))
            .unwrap();
    }
    // no extension, so it is a candidate, but not DICOM
    std::fs::write(dir.path().join("LICENSE"), "MIT License").unwrap();

    let volume = VolumeLoader::new(SortBy::ImagePositionPatient)
        .load_from_directory(dir.path())
        .unwrap();
    assert_eq!(volume.dim(), (3, ROWS as usize, COLUMNS as usize));
    assert_eq!(volume.data()[[2, 0, 0]], 100.0);
}

#[test]
fn unreadable_explicit_path_fails_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let license = dir.path().join("LICENSE");
    std::fs::write(&license, "MIT License").unwrap();
    let result = VolumeLoader::default().load_from_file_paths(&[license]);
    assert!(matches!(result, Err(VolumeLoaderError::Dicom(_))));
}

#[test]
fn missing_directory_is_an_io_error() {
    let result = VolumeLoader::default().load_from_directory("/nonexistent/series");
    assert!(matches!(result, Err(VolumeLoaderError::Io(_))));
}
