// SRT subtitle format: render and parse.

use std::time::Duration;

use crate::error::{Result, SubgenError};

use super::SrtSegment;

/// Render segments as SRT text.
pub fn render(segments: &[SrtSegment]) -> String {
    segments
        .iter()
        .map(|segment| {
            format!(
                "{}\n{} --> {}\n{}\n",
                segment.index,
                format_timestamp(segment.start),
                format_timestamp(segment.end),
                segment.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse SRT text into segments.
///
/// Tolerates CRLF line endings and extra blank lines between cues. Cue
/// numbers from the source are discarded; segments are re-indexed
/// contiguously from 1.
pub fn parse(text: &str) -> Result<Vec<SrtSegment>> {
    let normalized = text.replace("\r\n", "\n");
    let mut segments = Vec::new();

    for block in normalized.split("\n\n") {
        let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            continue;
        }

        // A block is `index`, `start --> end`, then one or more text lines.
        // Some files omit the index line.
        let timing_line_pos = lines
            .iter()
            .position(|l| l.contains("-->"))
            .ok_or_else(|| {
                SubgenError::Config(format!("Malformed SRT block, no timing line: {block:?}"))
            })?;

        let (start, end) = parse_timing_line(lines[timing_line_pos])?;
        let text = lines[timing_line_pos + 1..].join("\n");
        if text.is_empty() {
            continue;
        }

        segments.push(SrtSegment {
            index: segments.len() + 1,
            start,
            end,
            text,
        });
    }

    Ok(segments)
}

fn parse_timing_line(line: &str) -> Result<(Duration, Duration)> {
    let mut parts = line.splitn(2, "-->");
    let start = parts
        .next()
        .map(str::trim)
        .ok_or_else(|| SubgenError::Config(format!("Bad timing line: {line}")))?;
    let end = parts
        .next()
        .map(str::trim)
        .ok_or_else(|| SubgenError::Config(format!("Bad timing line: {line}")))?;
    Ok((parse_timestamp(start)?, parse_timestamp(end)?))
}

pub(crate) fn format_timestamp(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = d.subsec_millis();
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

fn parse_timestamp(s: &str) -> Result<Duration> {
    // HH:MM:SS,mmm (comma per SRT, but accept a period too)
    let s = s.replace('.', ",");
    let (hms, millis) = s
        .split_once(',')
        .ok_or_else(|| SubgenError::Config(format!("Bad timestamp: {s}")))?;
    let fields: Vec<&str> = hms.split(':').collect();
    if fields.len() != 3 {
        return Err(SubgenError::Config(format!("Bad timestamp: {s}")));
    }

    let hours: u64 = fields[0]
        .parse()
        .map_err(|_| SubgenError::Config(format!("Bad timestamp: {s}")))?;
    let minutes: u64 = fields[1]
        .parse()
        .map_err(|_| SubgenError::Config(format!("Bad timestamp: {s}")))?;
    let seconds: u64 = fields[2]
        .parse()
        .map_err(|_| SubgenError::Config(format!("Bad timestamp: {s}")))?;
    let millis: u64 = millis
        .parse()
        .map_err(|_| SubgenError::Config(format!("Bad timestamp: {s}")))?;

    Ok(Duration::from_millis(
        ((hours * 3600 + minutes * 60 + seconds) * 1000) + millis,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_segments() -> Vec<SrtSegment> {
        vec![
            SrtSegment {
                index: 1,
                start: Duration::from_millis(1500),
                end: Duration::from_millis(4000),
                text: "Hello, world!".to_string(),
            },
            SrtSegment {
                index: 2,
                start: Duration::from_millis(4500),
                end: Duration::from_millis(7000),
                text: "This is a test.".to_string(),
            },
        ]
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(Duration::from_millis(1500)), "00:00:01,500");
        assert_eq!(
            format_timestamp(Duration::from_secs(3661) + Duration::from_millis(123)),
            "01:01:01,123"
        );
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(
            parse_timestamp("00:00:01,500").unwrap(),
            Duration::from_millis(1500)
        );
        assert_eq!(
            parse_timestamp("01:01:01,123").unwrap(),
            Duration::from_secs(3661) + Duration::from_millis(123)
        );
        assert!(parse_timestamp("nonsense").is_err());
    }

    #[test]
    fn test_render() {
        let output = render(&sample_segments());
        assert!(output.contains("1\n00:00:01,500 --> 00:00:04,000\nHello, world!"));
        assert!(output.contains("2\n00:00:04,500 --> 00:00:07,000\nThis is a test."));
    }

    #[test]
    fn test_parse_round_trip() {
        let rendered = render(&sample_segments());
        let parsed = parse(&rendered).unwrap();
        assert_eq!(parsed, sample_segments());
    }

    #[test]
    fn test_parse_crlf_and_missing_index() {
        let srt = "00:00:01,000 --> 00:00:02,000\r\nLine one\r\n\r\n2\r\n00:00:03,000 --> 00:00:04,000\r\nLine two\r\n";
        let parsed = parse(srt).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].index, 1);
        assert_eq!(parsed[0].text, "Line one");
        assert_eq!(parsed[1].index, 2);
        assert_eq!(parsed[1].start, Duration::from_secs(3));
    }

    #[test]
    fn test_parse_multiline_cue() {
        let srt = "1\n00:00:01,000 --> 00:00:02,000\nFirst line\nSecond line\n";
        let parsed = parse(srt).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].text, "First line\nSecond line");
    }

    #[test]
    fn test_parse_rejects_block_without_timing() {
        assert!(parse("1\njust text\n").is_err());
    }
}
