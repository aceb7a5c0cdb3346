//! The shipped demo configuration loads and its grader behaves.

use std::path::PathBuf;
use std::time::Duration;

use regscore_core::score::ScoreValue;
use regscore_pipeline::grading::{GraderOptions, RhaiGrader};
use regscore_server::config::Config;

fn demo_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos/config.yaml")
}

#[test]
fn demo_config_loads_with_its_grader() {
    std::env::set_var("REGSCORE_IMAGE_DIR", "/srv/images");
    std::env::set_var("REGSCORE_SERVICE_URL", "http://localhost:8080/predict");

    let config = Config::load(&demo_config_path()).expect("demo config");

    assert_eq!(config.sourcer_cmd, "regscore-sourcer-roulette /srv/images");
    assert_eq!(config.service_url, "http://localhost:8080/predict");
    assert_eq!(config.listen_addr, "0.0.0.0:5020");
    assert_eq!(config.step_timeout, Some(Duration::from_secs(30)));

    let options = GraderOptions {
        max_operations: config.max_operations,
    };
    let grader = RhaiGrader::load_with(&config.grader_script, &options).expect("demo grader");

    let detection = r#"{
        "code": 0,
        "message": "",
        "data": {
            "predictions": {
                "d6f1db8f-48e2-4cbd-add0-357643174669": {
                    "score": 0.9007511138916016,
                    "labelName": "Flat Coated Retriever",
                    "labelIndex": 4,
                    "coordinates": {"xmin": 111, "ymin": 31, "xmax": 643, "ymax": 545}
                }
            },
            "type": "ObjectDetectionPrediction"
        }
    }"#;
    assert_eq!(grader.evaluate(detection).expect("score"), ScoreValue::Int(1));
    assert_eq!(
        grader.evaluate(r#"{"data":{"predictions":{"x":{"score":0.1}}}}"#).expect("score"),
        ScoreValue::Int(0)
    );
    assert_eq!(grader.evaluate("service unavailable").expect("score"), ScoreValue::Int(0));
}
