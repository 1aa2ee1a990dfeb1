use anyhow::{bail, Result};
use sheetstore_core::{RowInput, Value};

/// Parses `Column=value` arguments; an empty value resets the column
pub fn parse_fields(args: &[String]) -> Result<RowInput> {
    let mut fields = RowInput::new();
    for arg in args {
        let Some((name, value)) = arg.split_once('=') else {
            bail!("expected Column=value, got {:?}", arg);
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("missing column name in {:?}", arg);
        }
        let value = if value.is_empty() {
            Value::Null
        } else {
            Value::from(value)
        };
        if fields.insert(name.to_string(), value).is_some() {
            bail!("column {} given twice", name);
        }
    }
    Ok(fields)
}
