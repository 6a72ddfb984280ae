use crate::model::AnalysisResult;
use anyhow::Result;

/// A single result is written as one object; several as an array.
pub fn generate_json_string(results: &[AnalysisResult]) -> Result<String> {
    let json = match results {
        [single] => serde_json::to_string_pretty(single)?,
        many => serde_json::to_string_pretty(many)?,
    };
    Ok(json)
}

pub fn print_json(results: &[AnalysisResult]) -> Result<()> {
    println!("{}", generate_json_string(results)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::sample_result;

    #[test]
    fn test_top_level_keys() {
        let text = generate_json_string(&[sample_result()]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        for key in [
            "apk_info",
            "vulnerabilities",
            "protections",
            "features",
            "security_score",
            "complexity_level",
            "risk_assessment",
            "bypass_suggestions",
            "recommendations",
            "mitigation_steps",
            "processing_time",
            "timed_out",
            "scanned_at",
            "catalog_gaps",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }

        let vuln = &value["vulnerabilities"][0];
        assert_eq!(vuln["pattern_id"], "DEBUG_ENABLED");
        assert_eq!(vuln["severity"], "HIGH");
        assert_eq!(vuln["location"]["line"], 3);
        assert!(vuln.get("offset").is_none());
        assert_eq!(vuln["cwe"], "CWE-489");

        let info = &value["apk_info"];
        for key in ["md5", "sha1", "sha256", "signing_blocks", "compression_ratio", "total_dex_size"] {
            assert!(info.get(key).is_some(), "missing apk_info.{}", key);
        }
    }

    #[test]
    fn test_many_results_form_an_array() {
        let text = generate_json_string(&[sample_result(), sample_result()]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }
}
