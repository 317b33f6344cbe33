//! Per-table derived columns, computed after sampling and before segmentation.

use crate::frame::{Column, Frame, FrameError};
use crate::numeric::{
    divide, fill_missing, finite_power, finite_ratio, flag, floor_divide, light_divide, max_with,
    min_with, multiply, subtract,
};
use crate::segments::TableKind;

pub const DAYS_IN_MONTH: f64 = 365.0 / 12.0;
pub const SURPLUS_RATIO_CAP: f64 = 100.0;

/// Status alphabet of bureau balance snapshots, one indicator column each.
pub const BUREAU_BALANCE_STATUSES: [&str; 8] = ["0", "1", "2", "3", "4", "5", "C", "X"];

pub fn derive_columns(kind: TableKind, frame: &mut Frame) -> Result<(), FrameError> {
    match kind {
        TableKind::Bureau => derive_bureau(frame),
        TableKind::BureauBalance => derive_bureau_balance(frame),
        TableKind::PreviousApplication => derive_previous_application(frame),
        TableKind::Installments => derive_installments(frame),
        TableKind::PosBalance => derive_pos_balance(frame),
        TableKind::CreditCardBalance => derive_credit_card_balance(frame),
    }
}

fn zip2(
    frame: &Frame,
    a: &str,
    b: &str,
    f: impl Fn(Option<f64>, Option<f64>) -> Option<f64>,
) -> Result<Vec<Option<f64>>, FrameError> {
    let a = frame.numeric(a)?;
    let b = frame.numeric(b)?;
    Ok(a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect())
}

fn map1(
    frame: &Frame,
    a: &str,
    f: impl Fn(Option<f64>) -> Option<f64>,
) -> Result<Vec<Option<f64>>, FrameError> {
    Ok(frame.numeric(a)?.iter().map(|&x| f(x)).collect())
}

fn constant_ratio(values: &[Option<f64>], den: f64) -> Vec<Option<f64>> {
    values.iter().map(|&v| light_divide(v, Some(den))).collect()
}

fn derive_bureau(frame: &mut Frame) -> Result<(), FrameError> {
    let missing_info = frame.missing_per_row();

    let credit_duration = zip2(frame, "DAYS_CREDIT_ENDDATE", "DAYS_CREDIT", |end, start| {
        floor_divide(subtract(end, start), 30.0)
    })?;
    let credit_advance = constant_ratio(
        &zip2(frame, "DAYS_CREDIT_ENDDATE", "DAYS_ENDDATE_FACT", subtract)?,
        30.0,
    );

    let mut to_credit = Vec::new();
    for feature in [
        "AMT_CREDIT_SUM_DEBT",
        "AMT_CREDIT_MAX_OVERDUE",
        "AMT_CREDIT_SUM_OVERDUE",
        "AMT_CREDIT_SUM_LIMIT",
    ] {
        to_credit.push((
            format!("{feature}_to_credit"),
            zip2(frame, feature, "AMT_CREDIT_SUM", light_divide)?,
        ));
    }

    let annuity = frame.numeric("AMT_ANNUITY")?;
    let credit_sum = frame.numeric("AMT_CREDIT_SUM")?;
    let repaid_to_credit: Vec<Option<f64>> = annuity
        .iter()
        .zip(&credit_duration)
        .zip(credit_sum)
        .map(|((&ann, &dur), &sum)| light_divide(multiply(ann, dur), sum))
        .collect();
    let interest = repaid_to_credit
        .iter()
        .zip(&credit_duration)
        .map(|(&repaid, &dur)| {
            let base = repaid.map(|r| r + 1.0);
            finite_power(base, divide(Some(12.0), dur)).map(|v| v - 1.0)
        })
        .collect();

    let princ_to_repay_per_month =
        zip2(frame, "AMT_CREDIT_SUM_DEBT", "DAYS_CREDIT_ENDDATE", |debt, end| {
            light_divide(debt, divide(end, Some(30.0)))
        })?;
    let amt_repaid = zip2(frame, "AMT_CREDIT_SUM", "AMT_CREDIT_SUM_DEBT", |sum, debt| {
        subtract(sum, Some(fill_missing(debt, 0.0)))
    })?;

    frame.set_numeric("missing_info", missing_info)?;
    frame.set_numeric("credit_duration", credit_duration)?;
    frame.set_numeric("credit_advance", credit_advance)?;
    for (name, values) in to_credit {
        frame.set_numeric(name, values)?;
    }
    frame.set_numeric("repaid_to_credit", repaid_to_credit)?;
    frame.set_numeric("interest", interest)?;
    frame.set_numeric("princ_to_repay_per_month", princ_to_repay_per_month)?;
    frame.set_numeric("amt_repaid", amt_repaid)?;
    Ok(())
}

fn derive_previous_application(frame: &mut Frame) -> Result<(), FrameError> {
    let missing_info = frame.missing_per_row();

    let is_x_sell = match frame.column("PRODUCT_COMBINATION")? {
        Column::Text(values) => values
            .iter()
            .map(|v| flag(v.as_deref().is_some_and(|s| s.contains("X-Sell"))))
            .collect(),
        Column::Numeric(values) => values.iter().map(|_| flag(false)).collect(),
    };
    let active = map1(frame, "DAYS_TERMINATION", |days| {
        flag(days.is_some_and(|d| d > 0.0))
    })?;

    let ratios = [
        ("credit_to_app", "AMT_CREDIT", "AMT_APPLICATION"),
        ("credit_to_good", "AMT_CREDIT", "AMT_GOODS_PRICE"),
        ("annuity_to_good", "AMT_ANNUITY", "AMT_GOODS_PRICE"),
        ("annuity_to_credit", "AMT_ANNUITY", "AMT_CREDIT"),
        ("down_to_good", "AMT_DOWN_PAYMENT", "AMT_GOODS_PRICE"),
    ];
    let mut derived = Vec::new();
    for (name, num, den) in ratios {
        derived.push((name, zip2(frame, num, den, light_divide)?));
    }

    let spans = [
        ("days_diff_last_first", "DAYS_LAST_DUE", "DAYS_FIRST_DUE"),
        ("days_diff_last_last", "DAYS_LAST_DUE", "DAYS_LAST_DUE_1ST_VERSION"),
        ("credit_duration", "DAYS_TERMINATION", "DAYS_FIRST_DUE"),
        ("credit_duration2", "DAYS_FIRST_DUE", "DAYS_FIRST_DRAWING"),
    ];
    for (name, later, earlier) in spans {
        derived.push((name, zip2(frame, later, earlier, subtract)?));
    }

    frame.set_numeric("is_x_sell", is_x_sell)?;
    frame.set_numeric("missing_info", missing_info)?;
    frame.set_numeric("active", active)?;
    for (name, values) in derived {
        frame.set_numeric(name, values)?;
    }
    Ok(())
}

fn derive_installments(frame: &mut Frame) -> Result<(), FrameError> {
    let delay = zip2(frame, "DAYS_ENTRY_PAYMENT", "DAYS_INSTALMENT", subtract)?;
    let lacking = zip2(frame, "AMT_INSTALMENT", "AMT_PAYMENT", |due, paid| {
        max_with(subtract(due, paid), 0.0)
    })?;
    let surplus = zip2(frame, "AMT_PAYMENT", "AMT_INSTALMENT", |paid, due| {
        max_with(subtract(paid, due), 0.0)
    })?;

    let instalment = frame.numeric("AMT_INSTALMENT")?;
    let lacking_ratio = lacking
        .iter()
        .zip(instalment)
        .map(|(&l, &due)| finite_ratio(l, due))
        .collect();
    let surplus_ratio = surplus
        .iter()
        .zip(instalment)
        .map(|(&s, &due)| min_with(finite_ratio(s, due), SURPLUS_RATIO_CAP))
        .collect();

    let per_month = |money: &[Option<f64>]| -> Vec<Option<f64>> {
        money
            .iter()
            .zip(&delay)
            .map(|(&m, &d)| divide(multiply(m, d), Some(DAYS_IN_MONTH)))
            .collect()
    };
    let delay_money = per_month(&lacking);
    let advance_money = per_month(&surplus);

    frame.set_numeric("delay", delay)?;
    frame.set_numeric("lacking_money", lacking)?;
    frame.set_numeric("surplus_money", surplus)?;
    frame.set_numeric("lacking_money_ratio", lacking_ratio)?;
    frame.set_numeric("surplus_money_ratio", surplus_ratio)?;
    frame.set_numeric("delay_money", delay_money)?;
    frame.set_numeric("advance_money", advance_money)?;
    Ok(())
}

fn derive_pos_balance(frame: &mut Frame) -> Result<(), FrameError> {
    let no_inst = zip2(frame, "CNT_INSTALMENT", "CNT_INSTALMENT_FUTURE", subtract)?;
    frame.set_numeric("no_inst", no_inst)
}

fn derive_credit_card_balance(frame: &mut Frame) -> Result<(), FrameError> {
    let count_missing = frame.missing_per_row();

    let ratios = [
        ("bal_to_limit", "AMT_BALANCE", "AMT_CREDIT_LIMIT_ACTUAL"),
        ("draw_atm_to_limit", "AMT_DRAWINGS_ATM_CURRENT", "AMT_CREDIT_LIMIT_ACTUAL"),
        ("draw_pos_to_limit", "AMT_DRAWINGS_POS_CURRENT", "AMT_CREDIT_LIMIT_ACTUAL"),
        ("draw_other_to_limit", "AMT_DRAWINGS_OTHER_CURRENT", "AMT_CREDIT_LIMIT_ACTUAL"),
        ("draw_atm_to_min_inst", "AMT_DRAWINGS_ATM_CURRENT", "AMT_INST_MIN_REGULARITY"),
        ("draw_pos_to_min_inst", "AMT_DRAWINGS_POS_CURRENT", "AMT_INST_MIN_REGULARITY"),
        ("draw_other_to_min_inst", "AMT_DRAWINGS_OTHER_CURRENT", "AMT_INST_MIN_REGULARITY"),
    ];
    let mut derived = Vec::with_capacity(ratios.len());
    for (name, num, den) in ratios {
        derived.push((name, zip2(frame, num, den, light_divide)?));
    }

    frame.set_numeric("count_missing", count_missing)?;
    for (name, values) in derived {
        frame.set_numeric(name, values)?;
    }
    Ok(())
}

fn derive_bureau_balance(frame: &mut Frame) -> Result<(), FrameError> {
    let statuses = status_labels(frame, "STATUS")?;
    for status in BUREAU_BALANCE_STATUSES {
        let indicator = statuses
            .iter()
            .map(|s| flag(s.as_deref() == Some(status)))
            .collect();
        frame.set_numeric(format!("{status}_col"), indicator)?;
    }
    Ok(())
}

/// Status cells as text; purely numeric status columns are read as integers.
fn status_labels(frame: &Frame, name: &str) -> Result<Vec<Option<String>>, FrameError> {
    Ok(match frame.column(name)? {
        Column::Text(values) => values
            .iter()
            .map(|v| v.as_deref().map(|s| s.trim().to_string()))
            .collect(),
        Column::Numeric(values) => values.iter().map(|v| v.map(|n| format!("{n}"))).collect(),
    })
}
