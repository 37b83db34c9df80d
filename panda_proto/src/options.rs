//! Data connection option negotiation: the first line of a data
//! connection is a space-separated option list, including the
//! two presets `BARE` and `DEFAULT`.

use panda_capture::HeaderFormat;
use panda_capture::Process;

use crate::error::ProtoError;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct DataOptions {
    pub format: HeaderFormat,
    pub process: Process,
    pub xml: bool,
    pub no_header: bool,
    pub no_status: bool,
    pub one_shot: bool,
}

impl Default for DataOptions {
    fn default() -> Self {
        DataOptions {
            format: HeaderFormat::Ascii,
            process: Process::Scaled,
            xml: false,
            no_header: false,
            no_status: false,
            one_shot: false,
        }
    }
}

/// Parses the negotiation line. Presets (`BARE`/`DEFAULT`) set every field
/// they cover; a later explicit token still overrides a preset appearing
/// earlier on the same line, matching a left-to-right reading of the line.
pub fn parse(line: &str) -> Result<DataOptions> {
    let mut format = None;
    let mut process = None;
    let mut xml = false;
    let mut no_header = false;
    let mut no_status = false;
    let mut one_shot = false;

    for token in line.split_whitespace() {
        match token {
            "UNFRAMED" => format = Some(HeaderFormat::Unframed),
            "FRAMED" => format = Some(HeaderFormat::Framed),
            "BASE64" => format = Some(HeaderFormat::Base64),
            "ASCII" => format = Some(HeaderFormat::Ascii),
            "RAW" => process = Some(Process::Raw),
            "UNSCALED" => process = Some(Process::Unscaled),
            "SCALED" => process = Some(Process::Scaled),
            "NO_HEADER" => no_header = true,
            "NO_STATUS" => no_status = true,
            "ONE_SHOT" => one_shot = true,
            "XML" => xml = true,
            "BARE" => {
                format = Some(HeaderFormat::Unframed);
                process = Some(Process::Unscaled);
                no_header = true;
                no_status = true;
                one_shot = true;
            }
            "DEFAULT" => {
                format = Some(HeaderFormat::Ascii);
                process = Some(Process::Scaled);
            }
            other => return Err(ProtoError::Malformed(format!("unrecognised option {other:?}"))),
        }
    }

    Ok(DataOptions {
        format: format.unwrap_or(HeaderFormat::Ascii),
        process: process.unwrap_or(Process::Scaled),
        xml,
        no_header,
        no_status,
        one_shot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_preset_sets_every_covered_field() {
        let options = parse("BARE").unwrap();
        assert!(matches!(options.format, HeaderFormat::Unframed));
        assert!(matches!(options.process, Process::Unscaled));
        assert!(options.no_header && options.no_status && options.one_shot);
    }

    #[test]
    fn no_tokens_falls_back_to_default_preset_values() {
        let options = parse("").unwrap();
        assert!(matches!(options.format, HeaderFormat::Ascii));
        assert!(matches!(options.process, Process::Scaled));
    }

    #[test]
    fn unknown_token_is_rejected() {
        assert!(parse("FRAMED NONSENSE").is_err());
    }
}
