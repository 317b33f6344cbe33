#![allow(dead_code)]

use std::fs;
use std::path::Path;

use credit_features::{PipelineConfig, TableKind};

pub const TRAIN_IDS: [i64; 8] = [
    100001, 100002, 100003, 100004, 100005, 100006, 100007, 100008,
];
pub const TEST_IDS: [i64; 3] = [100009, 100010, 100011];
/// Owner of transactional rows that match no applicant.
pub const ORPHAN_ID: i64 = 999999;
pub const FIRST_BUREAU_ID: i64 = 5000;
pub const BUREAU_ROWS: usize = 30;

const CONTRACT_TYPES: [&str; 2] = ["Cash loans", "Revolving loans"];
const GENDERS: [&str; 3] = ["F", "M", "XNA"];
const CREDIT_ACTIVE: [&str; 3] = ["Active", "Closed", "Sold"];
const CREDIT_TYPES: [&str; 6] = [
    "Consumer credit",
    "Credit card",
    "Car loan",
    "Mortgage",
    "Microloan",
    "Another type of loan",
];
const CONTRACT_STATUSES: [&str; 3] = ["Approved", "Refused", "Canceled"];
const PRODUCT_COMBINATIONS: [&str; 3] = ["Cash X-Sell: low", "POS household", "Card Street"];

const APPLICATION_NUMERIC: [&str; 11] = [
    "AMT_INCOME_TOTAL",
    "AMT_CREDIT",
    "AMT_ANNUITY",
    "AMT_GOODS_PRICE",
    "CNT_FAM_MEMBERS",
    "OWN_CAR_AGE",
    "DAYS_BIRTH",
    "EXT_SOURCE_1",
    "EXT_SOURCE_2",
    "EXT_SOURCE_3",
    "FLAG_DOCUMENT_3",
];

const BUREAU_NUMERIC: [&str; 12] = [
    "DAYS_CREDIT",
    "CREDIT_DAY_OVERDUE",
    "DAYS_CREDIT_ENDDATE",
    "DAYS_ENDDATE_FACT",
    "AMT_CREDIT_MAX_OVERDUE",
    "CNT_CREDIT_PROLONG",
    "AMT_CREDIT_SUM",
    "AMT_CREDIT_SUM_DEBT",
    "AMT_CREDIT_SUM_LIMIT",
    "AMT_CREDIT_SUM_OVERDUE",
    "DAYS_CREDIT_UPDATE",
    "AMT_ANNUITY",
];

const PREVIOUS_NUMERIC: [&str; 17] = [
    "AMT_ANNUITY",
    "AMT_APPLICATION",
    "AMT_CREDIT",
    "AMT_DOWN_PAYMENT",
    "AMT_GOODS_PRICE",
    "HOUR_APPR_PROCESS_START",
    "DAYS_DECISION",
    "CNT_PAYMENT",
    "NFLAG_INSURED_ON_APPROVAL",
    "DAYS_FIRST_DRAWING",
    "DAYS_FIRST_DUE",
    "DAYS_LAST_DUE_1ST_VERSION",
    "DAYS_LAST_DUE",
    "DAYS_TERMINATION",
    "RATE_DOWN_PAYMENT",
    "RATE_INTEREST_PRIMARY",
    "RATE_INTEREST_PRIVILEGED",
];

const INSTALLMENTS_NUMERIC: [&str; 5] = [
    "NUM_INSTALMENT_NUMBER",
    "DAYS_INSTALMENT",
    "DAYS_ENTRY_PAYMENT",
    "AMT_INSTALMENT",
    "AMT_PAYMENT",
];

const POS_NUMERIC: [&str; 4] = [
    "CNT_INSTALMENT",
    "CNT_INSTALMENT_FUTURE",
    "SK_DPD",
    "SK_DPD_DEF",
];

const CC_NUMERIC: [&str; 19] = [
    "AMT_BALANCE",
    "AMT_CREDIT_LIMIT_ACTUAL",
    "AMT_DRAWINGS_ATM_CURRENT",
    "AMT_DRAWINGS_CURRENT",
    "AMT_DRAWINGS_OTHER_CURRENT",
    "AMT_DRAWINGS_POS_CURRENT",
    "AMT_INST_MIN_REGULARITY",
    "AMT_PAYMENT_CURRENT",
    "AMT_PAYMENT_TOTAL_CURRENT",
    "AMT_RECEIVABLE_PRINCIPAL",
    "AMT_RECIVABLE",
    "AMT_TOTAL_RECEIVABLE",
    "CNT_DRAWINGS_ATM_CURRENT",
    "CNT_DRAWINGS_CURRENT",
    "CNT_DRAWINGS_OTHER_CURRENT",
    "CNT_DRAWINGS_POS_CURRENT",
    "CNT_INSTALMENT_MATURE_CUM",
    "SK_DPD",
    "SK_DPD_DEF",
];

/// Small hand-written bureau balance: three snapshots of the first bureau
/// record, one of an unknown record and one without a record id.
pub const BUREAU_BALANCE_CSV: &str = "SK_ID_BUREAU,MONTHS_BALANCE,STATUS\n\
5000,0,0\n\
5000,-1,C\n\
5000,-20,X\n\
12345,0,1\n\
,-2,0\n";

/// Rows of the hand-written bureau balance that no bureau record owns.
pub const BUREAU_BALANCE_UNMAPPED: usize = 2;

pub fn all_ids() -> Vec<i64> {
    TRAIN_IDS.iter().chain(TEST_IDS.iter()).copied().collect()
}

/// Owner of the `row`-th transactional row.
pub fn owner(row: usize) -> i64 {
    if row % 13 == 12 {
        ORPHAN_ID
    } else {
        let ids = all_ids();
        ids[row % ids.len()]
    }
}

/// Deterministic numeric cell; roughly one cell in eleven is empty.
fn num(row: usize, col: usize) -> String {
    if (row + col) % 11 == 5 {
        return String::new();
    }
    let value = ((row * 37 + col * 101) % 211) as f64 - 60.0;
    format!("{value}")
}

fn pick(options: &[&str], row: usize, salt: usize) -> String {
    options[(row + salt) % options.len()].to_string()
}

struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn new(header: Vec<&str>) -> Self {
        Self {
            header: header.into_iter().map(str::to_string).collect(),
            rows: Vec::new(),
        }
    }

    fn render(&self, drop: Option<&str>) -> String {
        let keep: Vec<usize> = (0..self.header.len())
            .filter(|&i| Some(self.header[i].as_str()) != drop)
            .collect();
        let mut out = String::new();
        let line = |cells: &[String]| -> String {
            keep.iter()
                .map(|&i| cells[i].clone())
                .collect::<Vec<_>>()
                .join(",")
        };
        out.push_str(&line(&self.header));
        out.push('\n');
        for row in &self.rows {
            out.push_str(&line(row));
            out.push('\n');
        }
        out
    }
}

fn with_numeric(mut header: Vec<&'static str>, numeric: &[&'static str]) -> Vec<&'static str> {
    header.extend_from_slice(numeric);
    header
}

fn application(ids: &[i64], with_target: bool) -> Table {
    let mut header = vec!["SK_ID_CURR"];
    if with_target {
        header.push("TARGET");
    }
    header.extend(["NAME_CONTRACT_TYPE", "CODE_GENDER"]);
    let mut table = Table::new(with_numeric(header, &APPLICATION_NUMERIC));

    for (row, id) in ids.iter().enumerate() {
        let mut cells = vec![id.to_string()];
        if with_target {
            cells.push(if row % 3 == 0 { "1" } else { "0" }.to_string());
        }
        cells.push(pick(&CONTRACT_TYPES, row, 0));
        cells.push(pick(&GENDERS, row, 1));
        for (col, name) in APPLICATION_NUMERIC.iter().enumerate() {
            cells.push(match *name {
                "AMT_CREDIT" => format!("{}", 200_000 + row * 15_000),
                "AMT_ANNUITY" => format!("{}", 12_000 + row * 900),
                "CNT_FAM_MEMBERS" => format!("{}", 1 + row % 4),
                "FLAG_DOCUMENT_3" => format!("{}", row % 2),
                _ => num(row, col),
            });
        }
        table.rows.push(cells);
    }
    table
}

fn bureau() -> Table {
    let mut table = Table::new(with_numeric(
        vec![
            "SK_ID_CURR",
            "SK_ID_BUREAU",
            "CREDIT_ACTIVE",
            "CREDIT_CURRENCY",
            "CREDIT_TYPE",
        ],
        &BUREAU_NUMERIC,
    ));
    for row in 0..BUREAU_ROWS {
        let mut cells = vec![
            owner(row).to_string(),
            (FIRST_BUREAU_ID + row as i64).to_string(),
            pick(&CREDIT_ACTIVE, row, 0),
            if row % 4 == 0 {
                String::new()
            } else {
                pick(&["currency 1", "currency 2"], row, 0)
            },
            pick(&CREDIT_TYPES, row, 2),
        ];
        cells.extend((0..BUREAU_NUMERIC.len()).map(|col| num(row, col)));
        table.rows.push(cells);
    }
    table
}

fn previous_application() -> Table {
    let mut table = Table::new(with_numeric(
        vec![
            "SK_ID_PREV",
            "SK_ID_CURR",
            "NAME_CONTRACT_STATUS",
            "PRODUCT_COMBINATION",
        ],
        &PREVIOUS_NUMERIC,
    ));
    for row in 0..26 {
        let mut cells = vec![
            (2_000_000 + row).to_string(),
            owner(row).to_string(),
            pick(&CONTRACT_STATUSES, row, 0),
            pick(&PRODUCT_COMBINATIONS, row, 1),
        ];
        cells.extend((0..PREVIOUS_NUMERIC.len()).map(|col| num(row, col)));
        table.rows.push(cells);
    }
    table
}

fn installments() -> Table {
    let mut table = Table::new(with_numeric(
        vec!["SK_ID_PREV", "SK_ID_CURR", "NUM_INSTALMENT_VERSION"],
        &INSTALLMENTS_NUMERIC,
    ));
    for row in 0..40 {
        let mut cells = vec![
            (2_000_000 + row % 26).to_string(),
            owner(row).to_string(),
            format!("{}", row % 4),
        ];
        cells.extend(
            INSTALLMENTS_NUMERIC
                .iter()
                .enumerate()
                .map(|(col, name)| match *name {
                    "DAYS_INSTALMENT" => format!("-{}", (row * 53) % 900),
                    _ => num(row, col),
                }),
        );
        table.rows.push(cells);
    }
    table
}

fn pos_balance() -> Table {
    let mut table = Table::new(with_numeric(
        vec![
            "SK_ID_PREV",
            "SK_ID_CURR",
            "MONTHS_BALANCE",
            "NAME_CONTRACT_STATUS",
        ],
        &POS_NUMERIC,
    ));
    for row in 0..33 {
        let mut cells = vec![
            (2_000_000 + row % 26).to_string(),
            owner(row).to_string(),
            format!("-{}", row % 15),
            pick(&["Active", "Completed"], row, 0),
        ];
        cells.extend((0..POS_NUMERIC.len()).map(|col| num(row, col)));
        table.rows.push(cells);
    }
    table
}

fn credit_card_balance() -> Table {
    let mut table = Table::new(with_numeric(
        vec!["SK_ID_PREV", "SK_ID_CURR", "MONTHS_BALANCE"],
        &CC_NUMERIC,
    ));
    for row in 0..27 {
        let mut cells = vec![
            (2_000_000 + row % 26).to_string(),
            owner(row).to_string(),
            format!("-{}", row % 14),
        ];
        cells.extend((0..CC_NUMERIC.len()).map(|col| num(row, col)));
        table.rows.push(cells);
    }
    table
}

/// Writes every input table as CSV under `dir`, optionally without one
/// `(file stem, column)`.
pub fn write_fixtures(dir: &Path, drop: Option<(&str, &str)>) {
    let tables = [
        ("application_train", application(&TRAIN_IDS, true)),
        ("application_test", application(&TEST_IDS, false)),
        ("bureau", bureau()),
        ("previous_application", previous_application()),
        ("installments_payments", installments()),
        ("POS_CASH_balance", pos_balance()),
        ("credit_card_balance", credit_card_balance()),
    ];
    for (stem, table) in tables {
        let dropped = drop.filter(|(s, _)| *s == stem).map(|(_, column)| column);
        fs::write(dir.join(format!("{stem}.csv")), table.render(dropped)).unwrap();
    }
    fs::write(dir.join("bureau_balance.csv"), BUREAU_BALANCE_CSV).unwrap();
}

pub fn config(data_dir: &Path, output_name: &str, workers: usize) -> PipelineConfig {
    PipelineConfig {
        data_dir: data_dir.to_path_buf(),
        output_path: data_dir.join("out").join(output_name),
        report_path: None,
        sampling_fraction: 1.0,
        workers,
        sampling_seed: 42,
        tables: TableKind::ALL.to_vec(),
        expected_fingerprint: None,
    }
}

pub struct OutputTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl OutputTable {
    pub fn read(path: &Path) -> Self {
        let mut reader = csv::Reader::from_path(path).unwrap();
        let header = reader.headers().unwrap().iter().map(str::to_string).collect();
        let rows = reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();
        Self { header, rows }
    }

    pub fn column(&self, name: &str) -> Vec<&str> {
        let idx = self
            .header
            .iter()
            .position(|h| h == name)
            .unwrap_or_else(|| panic!("no column {name}"));
        self.rows.iter().map(|row| row[idx].as_str()).collect()
    }

    pub fn cell(&self, id: i64, name: &str) -> &str {
        let ids = self.column("SK_ID_CURR");
        let row = ids
            .iter()
            .position(|v| *v == id.to_string())
            .unwrap_or_else(|| panic!("no row for {id}"));
        self.column(name)[row]
    }
}
