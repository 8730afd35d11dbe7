//! XML response bodies as JSON.
//!
//! Attributes become `-name` keys, mixed text becomes `#text`, repeated
//! sibling elements fold into arrays and a leaf element is its text.

use roxmltree::{Document, Node};
use serde_json::{Map, Value};

use crate::error::{DownlinkError, Result};

const WRAPPER: &str = "_";
const TEXT_KEY: &str = "#text";

pub fn xml_to_json(body: &str) -> Result<Value> {
    let doc = Document::parse(body).map_err(|e| DownlinkError::Xml(e.to_string()))?;
    let root = doc.root_element();
    let name = root.tag_name().name();
    let value = element_value(root);

    if name == WRAPPER {
        return Ok(value);
    }
    let mut wrapped = Map::new();
    wrapped.insert(name.to_string(), value);
    Ok(Value::Object(wrapped))
}

fn element_value(node: Node) -> Value {
    let children: Vec<Node> = node.children().filter(|c| c.is_element()).collect();
    let text: String = node
        .children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect::<String>()
        .trim()
        .to_string();

    if children.is_empty() && node.attributes().next().is_none() {
        return Value::String(text);
    }

    let mut map = Map::new();
    for attr in node.attributes() {
        map.insert(format!("-{}", attr.name()), Value::String(attr.value().to_string()));
    }
    for child in children {
        let key = child.tag_name().name().to_string();
        let value = element_value(child);
        match map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key, value);
            }
        }
    }
    if !text.is_empty() {
        map.insert(TEXT_KEY.to_string(), Value::String(text));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repeated_siblings_become_array() {
        let body = r#"<data><reading unit="C">21.5</reading><reading unit="C">22</reading><station>north</station></data>"#;
        assert_eq!(
            xml_to_json(body).unwrap(),
            json!({"data": {
                "reading": [
                    {"-unit": "C", "#text": "21.5"},
                    {"-unit": "C", "#text": "22"}
                ],
                "station": "north"
            }})
        );
    }

    #[test]
    fn test_wrapper_is_stripped() {
        let body = "<_><a>1</a><b/></_>";
        assert_eq!(xml_to_json(body).unwrap(), json!({"a": "1", "b": ""}));
    }

    #[test]
    fn test_invalid_xml() {
        assert!(matches!(xml_to_json("<a><b></a>"), Err(DownlinkError::Xml(_))));
        assert!(xml_to_json("{\"a\":1}").is_err());
    }
}
