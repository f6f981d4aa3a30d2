use crate::cleanup::DeletePlan;
use crate::ingest::IngestReport;
use crate::storage::RawStats;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct MetricRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<MetricRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: impl ToString) {
        self.rows.push(MetricRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn ingest_table(report: &IngestReport) -> String {
    let mut builder = TableBuilder::new();
    builder.add_row("Model", &report.model);
    builder.add_row("Records", report.records);
    builder.add_row("Skipped (bad pk)", report.skipped_pk);
    builder.add_row("AlyxRaw rows", report.raw_inserted);
    builder.add_row("AlyxRaw.Field rows", report.fields_inserted);
    builder.add_row("Oversized json", report.oversized);
    builder.add_row("Duplicates", report.duplicates);
    builder.build()
}

#[derive(Tabled)]
struct ModelRow<'a> {
    #[tabled(rename = "Model")]
    model: &'a str,
    #[tabled(rename = "Records")]
    records: usize,
    #[tabled(rename = "Fields")]
    fields: usize,
}

pub fn stats_table(stats: &RawStats) -> String {
    if stats.models.is_empty() {
        return String::new();
    }
    let rows: Vec<ModelRow> = stats
        .models
        .iter()
        .map(|m| ModelRow { model: &m.model, records: m.records, fields: m.fields })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct PlanRow<'a> {
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Class")]
    class_name: &'a str,
    #[tabled(rename = "Label")]
    label: &'a str,
    #[tabled(rename = "Rows")]
    rows: usize,
}

pub fn plan_table(plan: &DeletePlan) -> String {
    let rows: Vec<PlanRow> = plan
        .entries
        .iter()
        .map(|e| PlanRow {
            table: e.table.table.full_name(),
            class_name: &e.table.class_name,
            label: e.table.label.as_str(),
            rows: e.rows,
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}
