use std::path::PathBuf;

use regex::Regex;

/// Scans tool output for the artifact path. When several lines match, the
/// last one wins: the tool logs intermediate outputs before the final file.
pub fn parse_artifact_path<'a, I>(pattern: &Regex, lines: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .filter_map(|line| capture_path(pattern, line))
        .last()
}

// Named group `path`, then group 1, then the whole match.
fn capture_path(pattern: &Regex, line: &str) -> Option<PathBuf> {
    let captures = pattern.captures(line)?;
    let matched = captures
        .name("path")
        .or_else(|| captures.get(1))
        .or_else(|| captures.get(0))?;
    let value = matched.as_str().trim();
    if value.is_empty() {
        return None;
    }
    Some(PathBuf::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoke_pattern() -> Regex {
        Regex::new(r"(?P<path>/\S*outputs/\S*?\d+\.\d+\.?png)").expect("valid regex")
    }

    #[test]
    fn single_matching_line_yields_exact_path() {
        let lines = [
            ">> Loading model from models/ldm/stable-diffusion-v1/model.ckpt",
            ">> Outputs:",
            "[1] /srv/invokeai/outputs/12345.6789png: \"sunset\" -s50 -S12345",
            ">> Usage stats: 1 image(s) generated in 41.2s",
        ];
        assert_eq!(
            parse_artifact_path(&invoke_pattern(), lines),
            Some(PathBuf::from("/srv/invokeai/outputs/12345.6789png"))
        );
    }

    #[test]
    fn last_matching_line_wins() {
        let lines = [
            "[1] /srv/invokeai/outputs/42.0001png: \"sunset\" -S42",
            ">> Upscaling",
            "[1] /srv/invokeai/outputs/42.0002png: \"sunset\" -S42 -U2",
        ];
        assert_eq!(
            parse_artifact_path(&invoke_pattern(), lines),
            Some(PathBuf::from("/srv/invokeai/outputs/42.0002png"))
        );
    }

    #[test]
    fn no_matching_line_yields_none() {
        let lines = [">> Loading model", "CUDA out of memory", ""];
        assert_eq!(parse_artifact_path(&invoke_pattern(), lines), None);
    }

    #[test]
    fn falls_back_to_first_group_then_whole_match() {
        let grouped = Regex::new(r"^Saved: (\S+)$").expect("valid regex");
        assert_eq!(
            parse_artifact_path(&grouped, ["Saved: /tmp/out/1.png"]),
            Some(PathBuf::from("/tmp/out/1.png"))
        );

        let bare = Regex::new(r"/\S+\.png").expect("valid regex");
        assert_eq!(
            parse_artifact_path(&bare, ["wrote /tmp/out/2.png ok"]),
            Some(PathBuf::from("/tmp/out/2.png"))
        );
    }
}
