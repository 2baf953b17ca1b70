use std::fs;

use assert_matches::assert_matches;

use qib_transmart::error::QibError;
use qib_transmart::patient_map::PatientMap;

#[test]
fn load_resolves_mapped_and_unmapped_labels() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("patients.tsv");
    fs::write(&path, "XNAT_S1\tP001\n\nXNAT_S2\tP002\textra\n").unwrap();

    let map = PatientMap::load(&path).unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map.resolve("XNAT_S1"), "P001");
    assert_eq!(map.resolve("XNAT_S2"), "P002");
    assert_eq!(map.resolve("XNAT_S9"), "XNAT_S9");
}

#[test]
fn short_line_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("patients.tsv");
    fs::write(&path, "XNAT_S1\tP001\nXNAT_S2\n").unwrap();

    let err = PatientMap::load(&path).unwrap_err();
    assert_matches!(err, QibError::PatientMap { path: reported, .. } if reported == path);
}

#[test]
fn missing_file_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let err = PatientMap::load(&temp.path().join("absent.tsv")).unwrap_err();
    assert_matches!(err, QibError::PatientMap { .. });
}

#[test]
fn empty_map_passes_labels_through() {
    let map = PatientMap::default();
    assert!(map.is_empty());
    assert_eq!(map.resolve("XNAT_S1"), "XNAT_S1");
}
