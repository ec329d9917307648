//! Lectura tolerante del payload libre del operador.
//!
//! Cada campo lógico se busca en un grupo de claves; gana la primera clave
//! presente con un valor utilizable. Los números pueden llegar como número
//! JSON o como texto (formularios/OCR).
use serde_json::Value;

pub const MASS_KEYS: &[&str] = &["measured_mass", "mass", "weight"];
pub const FINE_PERCENT_KEYS: &[&str] = &["fine_content_percent", "fine_percent", "purity"];
pub const OUTPUT_KEYS: &[&str] = &["output_weight", "pour_weight", "weight"];
pub const POUR_KEYS: &[&str] = &["pour_weight", "output_weight", "weight"];
pub const EXPECTED_MASS_KEY: &str = "expected_mass";

fn as_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Primer valor numérico entre `keys`.
pub fn first_number(payload: &Value, keys: &[&str]) -> Option<f64> {
    let obj = payload.as_object()?;
    keys.iter().find_map(|k| obj.get(*k).and_then(as_number))
}

/// Texto no vacío en `key` (los números se aceptan y se formatean).
pub fn text(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_present_key_wins() {
        let p = json!({"weight": 10, "mass": 20});
        assert_eq!(first_number(&p, MASS_KEYS), Some(20.0));
    }

    #[test]
    fn unusable_values_are_skipped() {
        let p = json!({"measured_mass": null, "mass": "n/a", "weight": " 1500.5 "});
        assert_eq!(first_number(&p, MASS_KEYS), Some(1500.5));
        assert_eq!(first_number(&json!("not an object"), MASS_KEYS), None);
    }

    #[test]
    fn text_accepts_numbers() {
        let p = json!({"drill_number": 4471, "supplier": "  ", "destination": "Vault 2"});
        assert_eq!(text(&p, "drill_number").as_deref(), Some("4471"));
        assert_eq!(text(&p, "supplier"), None);
        assert_eq!(text(&p, "destination").as_deref(), Some("Vault 2"));
    }
}
