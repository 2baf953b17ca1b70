use std::collections::BTreeMap;

use qib_transmart::domain::ConceptKey;
use qib_transmart::tagger::MetadataTagger;
use qib_transmart::xnat::{BaseSession, Biomarker, QibSession};

fn session(attributes: &[(&str, &str)], accession: Option<&str>) -> QibSession {
    QibSession {
        label: "QIB_S1_L_T0".to_string(),
        attributes: attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        categories: Vec::new(),
        base_sessions: accession
            .map(|id| {
                vec![
                    BaseSession {
                        accession_identifier: Some(id.to_string()),
                    },
                    BaseSession {
                        accession_identifier: Some("IGNORED".to_string()),
                    },
                ]
            })
            .unwrap_or_default(),
    }
}

fn femur() -> Biomarker {
    Biomarker {
        name: "Femur volume".to_string(),
        value: "10980.625".to_string(),
        ontology_name: Some("Uberon".to_string()),
        ontology_iri: Some("http://purl.obolibrary.org/obo/UBERON_0000981".to_string()),
    }
}

#[test]
fn identical_tag_lines_are_written_once() {
    let tags = vec!["analysis_tool".to_string(), "analysis_tool_version".to_string()];
    let mut tagger = MetadataTagger::new(Vec::new(), tags);
    tagger.write_header().unwrap();

    let first = session(
        &[("analysis_tool", "Segmenter"), ("analysis_tool_version", "0.1")],
        None,
    );
    let second = first.clone();
    assert_eq!(tagger.tag_prefix(&first).unwrap(), "Segmenter 0.1");
    assert_eq!(tagger.tag_prefix(&second).unwrap(), "Segmenter 0.1");

    let written = String::from_utf8(tagger.into_inner()).unwrap();
    assert_eq!(
        written,
        "Concept Path\tTitle\tDescription\tWeight\n\
         Segmenter 0.1\tanalysis tool\tSegmenter\t2\n\
         Segmenter 0.1\tanalysis tool version\t0.1\t1\n"
    );
}

#[test]
fn lines_differing_only_in_weight_are_both_written() {
    let tags = vec!["operator".to_string(), "analysis_tool".to_string()];
    let mut tagger = MetadataTagger::new(Vec::new(), tags);

    // "analysis_tool" weighs 1 when "operator" is present and 2 when it is not.
    tagger
        .tag_prefix(&session(&[("operator", "jd"), ("analysis_tool", "Seg")], None))
        .unwrap();
    tagger
        .tag_prefix(&session(&[("analysis_tool", "Seg")], None))
        .unwrap();

    let written = String::from_utf8(tagger.into_inner()).unwrap();
    let lines: Vec<_> = written.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Seg\toperator\tjd\t2",
            "Seg\tanalysis tool\tSeg\t1",
            "Seg\tanalysis tool\tSeg\t2",
        ]
    );
}

#[test]
fn ontology_and_accession_tags() {
    let mut tagger = MetadataTagger::new(Vec::new(), Vec::new());
    let key = ConceptKey::from("Segmenter 0.1\\Bone T0\\Left\\Femur volume");
    let qib = session(&[], Some("XNAT_E00042"));

    tagger.tag_ontology(&key, &femur(), &qib).unwrap();
    tagger.tag_ontology(&key, &femur(), &qib).unwrap();
    assert_eq!(tagger.lines_written(), 3);

    let written = String::from_utf8(tagger.into_inner()).unwrap();
    assert_eq!(
        written,
        "Segmenter 0.1\\Bone T0\\Left\\Femur volume\tOntology name\tUberon\t1\n\
         Segmenter 0.1\\Bone T0\\Left\\Femur volume\tOntology IRI\thttp://purl.obolibrary.org/obo/UBERON_0000981\t1\n\
         Segmenter 0.1\\Bone T0\\Left\\Femur volume\taccession identifier\tXNAT_E00042\t2\n"
    );
}

#[test]
fn missing_ontology_fields_are_skipped() {
    let mut tagger = MetadataTagger::new(Vec::new(), Vec::new());
    let key = ConceptKey::from("Generic Tool\\Bone\\Patella volume");
    let biomarker = Biomarker {
        name: "Patella volume".to_string(),
        value: "1".to_string(),
        ontology_name: Some("Uberon".to_string()),
        ontology_iri: None,
    };
    tagger.tag_ontology(&key, &biomarker, &session(&[], None)).unwrap();

    let written = String::from_utf8(tagger.into_inner()).unwrap();
    assert_eq!(
        written,
        "Generic Tool\\Bone\\Patella volume\tOntology name\tUberon\t1\n"
    );
}
