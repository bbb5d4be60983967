use std::sync::LazyLock;

use regex::Regex;

use crate::PsrpError;

static ESCAPED_CODE_UNIT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"_x([0-9A-Fa-f]{4})_"));

/// Decodes CLIXML `_xHHHH_` escapes, each one a UTF-16 code unit.
///
/// Consecutive escapes may form a surrogate pair. Input that does not decode to valid
/// UTF-16 is returned unchanged.
pub fn decode_escaped(input: &str) -> Result<String, PsrpError> {
    if !input.contains("_x") {
        return Ok(input.to_owned());
    }

    let pattern = ESCAPED_CODE_UNIT
        .as_ref()
        .map_err(|_| PsrpError::InvalidMessage("escape pattern failed to compile".into()))?;

    let mut units: Vec<u16> = Vec::with_capacity(input.len());
    let mut last = 0;

    for captures in pattern.captures_iter(input) {
        let (Some(whole), Some(hex)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let Ok(unit) = u16::from_str_radix(hex.as_str(), 16) else {
            continue;
        };

        units.extend(input[last..whole.start()].encode_utf16());
        units.push(unit);
        last = whole.end();
    }
    units.extend(input[last..].encode_utf16());

    Ok(String::from_utf16(&units).unwrap_or_else(|_| input.to_owned()))
}
