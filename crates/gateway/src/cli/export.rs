//! Transcript export formats (JSON / CSV / HTML).

use serde_json::Value;

use super::client::CliError;

/// The full machine-readable record: debate, messages, votes, consensus
/// and the event log.
pub fn to_json(detail: &Value, events: &Value) -> Result<String, CliError> {
    let combined = serde_json::json!({
        "debate": detail["debate"],
        "messages": detail["messages"],
        "votes": detail["votes"],
        "consensus": detail["consensus"],
        "events": events["events"],
    });
    serde_json::to_string_pretty(&combined).map_err(|e| CliError::other(e.to_string()))
}

/// One row per message: round, agent, role, confidence, timestamp, content.
pub fn to_csv(detail: &Value) -> String {
    let mut out = String::from("round,agent,role,confidence,timestamp,content\n");
    if let Some(messages) = detail["messages"].as_array() {
        for m in messages {
            out.push_str(&format!(
                "{},{},{},{},{},{}\n",
                m["round"].as_u64().unwrap_or(0),
                csv_field(m["agent"].as_str().unwrap_or("")),
                csv_field(m["role"].as_str().unwrap_or("")),
                m["confidence"].as_f64().map(|c| c.to_string()).unwrap_or_default(),
                csv_field(m["ts"].as_str().unwrap_or("")),
                csv_field(m["content"].as_str().unwrap_or("")),
            ));
        }
    }
    out
}

/// A standalone transcript page.
pub fn to_html(detail: &Value) -> String {
    let debate = &detail["debate"];
    let task = html_escape(debate["task"].as_str().unwrap_or(""));
    let slug = html_escape(debate["slug"].as_str().unwrap_or(""));
    let outcome = html_escape(debate["outcome"].as_str().unwrap_or("in progress"));

    let mut body = String::new();
    if let Some(messages) = detail["messages"].as_array() {
        for m in messages {
            body.push_str(&format!(
                "<article><header><b>{}</b> · round {} · {}{}</header><p>{}</p></article>\n",
                html_escape(m["agent"].as_str().unwrap_or("")),
                m["round"].as_u64().unwrap_or(0),
                html_escape(m["role"].as_str().unwrap_or("")),
                m["confidence"]
                    .as_f64()
                    .map(|c| format!(" · confidence {c:.2}"))
                    .unwrap_or_default(),
                html_escape(m["content"].as_str().unwrap_or("")),
            ));
        }
    }

    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\">\
         <title>{slug}</title></head>\n<body>\n<h1>{task}</h1>\n\
         <p>outcome: {outcome}</p>\n{body}</body></html>\n"
    )
}

/// Quote a CSV field, doubling embedded quotes.
fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail() -> Value {
        serde_json::json!({
            "debate": {
                "slug": "pick-x-1234",
                "task": "Pick <X> & Y",
                "outcome": "consensus",
            },
            "messages": [
                {
                    "round": 1, "agent": "a", "role": "proposer",
                    "confidence": 0.8, "ts": "2026-01-01T00:00:00Z",
                    "content": "Use \"X\", always"
                }
            ],
            "votes": [],
            "consensus": null,
        })
    }

    #[test]
    fn csv_quotes_embedded_punctuation() {
        let csv = to_csv(&detail());
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "round,agent,role,confidence,timestamp,content"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("1,a,proposer,0.8,"));
        assert!(row.ends_with("\"Use \"\"X\"\", always\""));
    }

    #[test]
    fn html_escapes_task_and_content() {
        let html = to_html(&detail());
        assert!(html.contains("Pick &lt;X&gt; &amp; Y"));
        assert!(html.contains("outcome: consensus"));
    }

    #[test]
    fn json_combines_sections() {
        let events = serde_json::json!({"events": [{"seq": 1}]});
        let out = to_json(&detail(), &events).unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["events"][0]["seq"], 1);
        assert_eq!(v["debate"]["slug"], "pick-x-1234");
    }
}
