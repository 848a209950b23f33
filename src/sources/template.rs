//! `{placeholder}` expansion for request URLs, bodies and browser actions

use chrono::{Datelike, Months, NaiveDate};

use crate::pipeline::WorkUnit;
use crate::utils::time::{first_of_month, month_name};

/// Dates a unit covers: a single day, or a whole month for monthly units
fn unit_span(unit: &WorkUnit, run_date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let date = unit.date.unwrap_or(run_date);
    // Monthly labels are `YYYY-MM`
    if unit.label.len() == 7 && date.day() == 1 {
        let end = first_of_month(date)
            .checked_add_months(Months::new(1))
            .and_then(|d| d.pred_opt())
            .unwrap_or(date);
        (date, end)
    } else {
        (date, date)
    }
}

/// Expand `{date}`, `{from_date}`, `{to_date}`, `{year}`, `{month}`,
/// `{month_name}`, `{label}` and `{run_date}` for one unit
pub fn render(template: &str, unit: &WorkUnit, run_date: NaiveDate, date_format: &str) -> String {
    if !template.contains('{') {
        return template.to_string();
    }
    let (from, to) = unit_span(unit, run_date);
    template
        .replace("{date}", &from.format(date_format).to_string())
        .replace("{from_date}", &from.format(date_format).to_string())
        .replace("{to_date}", &to.format(date_format).to_string())
        .replace("{year}", &from.year().to_string())
        .replace("{month}", &format!("{:02}", from.month()))
        .replace("{month_name}", month_name(from))
        .replace("{label}", &unit.label)
        .replace("{run_date}", &run_date.format(date_format).to_string())
}
