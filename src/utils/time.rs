//! Clock formatting helpers

/// Format a duration in whole seconds as `MM:SS`.
///
/// Minutes are not wrapped at the hour; a 75-minute recording reads `75:30`.
pub fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_small_values() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(7), "00:07");
        assert_eq!(format_clock(59), "00:59");
    }

    #[test]
    fn rolls_minutes() {
        assert_eq!(format_clock(60), "01:00");
        assert_eq!(format_clock(12 * 60 + 34), "12:34");
    }

    #[test]
    fn minutes_exceed_an_hour_unwrapped() {
        assert_eq!(format_clock(75 * 60 + 30), "75:30");
    }
}
