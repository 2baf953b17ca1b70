use serde_json::json;

use assert_matches::assert_matches;
use qib_transmart::error::QibError;
use qib_transmart::xnat::{SessionAttributes, parse_qib_session};

fn session_body() -> serde_json::Value {
    json!({
        "items": [{
            "meta": {"xsi:type": "icr:qibResultsData"},
            "data_fields": {
                "ID": "XNAT_E00042",
                "label": "QIB_SUBJ01_L_T0",
                "analysis_tool": "Segmenter",
                "analysis_tool_version": 1.2,
                "processing_date": ""
            },
            "children": [
                {
                    "field": "biomarker_categories/biomarker_category",
                    "items": [{
                        "data_fields": {"name": "Cartilage"},
                        "children": [{
                            "field": "biomarkers/biomarker",
                            "items": [
                                {"data_fields": {
                                    "name": "Femoral cartilage volume",
                                    "value": "6980.625",
                                    "ontology_name": "Uberon",
                                    "ontology_iri": "http://purl.obolibrary.org/obo/UBERON_0001995"
                                }},
                                {"data_fields": {
                                    "name": "Tibial cartilage volume",
                                    "value": 3120.5,
                                    "ontology_name": ""
                                }}
                            ]
                        }]
                    }]
                },
                {
                    "field": "base_sessions/base_session",
                    "items": [
                        {"data_fields": {"accession_identifier": "XNAT_E00007"}},
                        {"data_fields": {"accession_identifier": "XNAT_E00008"}}
                    ]
                }
            ]
        }]
    })
}

#[test]
fn parses_attributes_categories_and_base_sessions() {
    let session = parse_qib_session("QIB_SUBJ01_L_T0", &session_body()).unwrap();

    assert_eq!(session.label, "QIB_SUBJ01_L_T0");
    assert_eq!(
        session.try_get_attribute("analysis_tool").as_deref(),
        Some("Segmenter")
    );
    assert_eq!(
        session.try_get_attribute("analysis_tool_version").as_deref(),
        Some("1.2")
    );
    assert_eq!(session.try_get_attribute("processing_date"), None);

    assert_eq!(session.categories.len(), 1);
    let cartilage = &session.categories[0];
    assert_eq!(cartilage.name, "Cartilage");
    assert_eq!(cartilage.biomarkers.len(), 2);
    assert_eq!(cartilage.biomarkers[0].value, "6980.625");
    assert_eq!(cartilage.biomarkers[0].ontology_name.as_deref(), Some("Uberon"));
    assert_eq!(cartilage.biomarkers[1].value, "3120.5");
    assert_eq!(cartilage.biomarkers[1].ontology_name, None);
    assert_eq!(cartilage.biomarkers[1].ontology_iri, None);

    let accessions: Vec<_> = session
        .base_sessions
        .iter()
        .map(|base| base.accession_identifier.as_deref())
        .collect();
    assert_eq!(accessions, vec![Some("XNAT_E00007"), Some("XNAT_E00008")]);
}

#[test]
fn session_without_children_has_no_categories() {
    let body = json!({"items": [{"data_fields": {"label": "QIB_S2"}}]});
    let session = parse_qib_session("QIB_S2", &body).unwrap();
    assert!(session.categories.is_empty());
    assert!(session.base_sessions.is_empty());
}

#[test]
fn empty_item_list_is_a_response_error() {
    let err = parse_qib_session("QIB_S3", &json!({"items": []})).unwrap_err();
    assert_matches!(err, QibError::XnatResponse(_));
}
