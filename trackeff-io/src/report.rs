//! Fixed-width efficiency tables.

use trackeff_algorithms::EfficiencyResult;

/// Line printed instead of a table when the ratios are undefined.
pub const NO_DATA: &str = "  no data for this selection";

/// Renders [`EfficiencyResult`]s as the two-column efficiency table:
///
/// ```text
///              |  w/o bc  | w/ b.c.
///    ----------+----------+----------
///      Total   |         3|         3
///      Signal  |         2|         2
///       MC     |         3|         3
///   Efficiency |    66.67%|    66.67%
///     Purity   |    66.67%|    66.67%
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportFormatter;

impl ReportFormatter {
    /// Creates a formatter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Formats one result; every line ends with a newline.
    #[must_use]
    pub fn format(&self, result: &EfficiencyResult) -> String {
        let Some(metrics) = result.metrics() else {
            return format!("{NO_DATA}\n");
        };
        let mut out = String::new();
        out.push_str("             |  w/o bc  | w/ b.c.  \n");
        out.push_str("   ----------+----------+----------\n");
        out.push_str(&format!(
            "     Total   |{:>10}|{:>10}\n",
            result.n_total, result.n_ranked
        ));
        out.push_str(&format!(
            "     Signal  |{:>10}|{:>10}\n",
            result.n_signal, result.n_signal_ranked
        ));
        out.push_str(&format!(
            "      MC     |{:>10}|{:>10}\n",
            result.n_truth, result.n_truth
        ));
        out.push_str(&format!(
            "  Efficiency |{}%|{}%\n",
            percent(Some(metrics.efficiency)),
            percent(Some(metrics.efficiency_ranked))
        ));
        out.push_str(&format!(
            "    Purity   |{}%|{}%\n",
            percent(Some(metrics.purity)),
            percent(metrics.purity_ranked)
        ));
        out
    }
}

/// A fraction as a `%9.4g` percentage; undefined ratios print as `nan`.
fn percent(fraction: Option<f64>) -> String {
    let value = fraction.map_or(f64::NAN, |f| 100.0 * f);
    format!("{:>9}", format_g(value, 4))
}

/// Formats a float like C's `%.<precision>g`.
///
/// Uses scientific notation when the decimal exponent is below -4 or at
/// least `precision`; trailing zeros are removed in both forms.
#[must_use]
pub fn format_g(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let precision = precision.max(1);
    // Rounding to `precision` digits can bump the exponent (9.9995 -> 10.00).
    let sci = format!("{:.*e}", precision - 1, value);
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    let digits = precision as i32;
    if exponent < -4 || exponent >= digits {
        let mantissa = trim_zeros(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
    } else {
        #[allow(clippy::cast_sign_loss)]
        let decimals = (digits - 1 - exponent) as usize;
        trim_zeros(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_zeros(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_g_matches_c() {
        assert_eq!(format_g(66.666_666, 4), "66.67");
        assert_eq!(format_g(100.0, 4), "100");
        assert_eq!(format_g(50.0, 4), "50");
        assert_eq!(format_g(0.123_456, 4), "0.1235");
        assert_eq!(format_g(0.000_012_34, 4), "1.234e-05");
        assert_eq!(format_g(123_456.0, 4), "1.235e+05");
        assert_eq!(format_g(9_999.6, 4), "1e+04");
        assert_eq!(format_g(1234.0, 4), "1234");
        assert_eq!(format_g(-2.5, 4), "-2.5");
        assert_eq!(format_g(0.0, 4), "0");
        assert_eq!(format_g(f64::NAN, 4), "nan");
    }

    #[test]
    fn test_table_layout() {
        let result = EfficiencyResult {
            n_total: 3,
            n_signal: 2,
            n_signal_ranked: 2,
            n_ranked: 3,
            n_truth: 3,
        };
        let expected = "             |  w/o bc  | w/ b.c.  \n\
                        \x20  ----------+----------+----------\n\
                        \x20    Total   |         3|         3\n\
                        \x20    Signal  |         2|         2\n\
                        \x20     MC     |         3|         3\n\
                        \x20 Efficiency |    66.67%|    66.67%\n\
                        \x20   Purity   |    66.67%|    66.67%\n";
        assert_eq!(ReportFormatter::new().format(&result), expected);
    }

    #[test]
    fn test_undefined_result() {
        let result = EfficiencyResult {
            n_truth: 10,
            ..EfficiencyResult::default()
        };
        assert_eq!(ReportFormatter::new().format(&result), format!("{NO_DATA}\n"));
    }

    #[test]
    fn test_ranked_purity_without_ranked_candidates() {
        let result = EfficiencyResult {
            n_total: 4,
            n_signal: 1,
            n_signal_ranked: 0,
            n_ranked: 0,
            n_truth: 8,
        };
        let table = ReportFormatter::new().format(&result);
        assert!(table.contains("    Purity   |       25%|      nan%"));
        assert!(table.contains("  Efficiency |     12.5%|        0%"));
    }
}
