use anyhow::Result;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};

use crate::logic::multi_step::{FormErrors, MultiStepForm, Workflow, WorkflowStep};
use crate::model::{
    Cell, Column, ColumnType, EntityId, Library, StepArgs, StepRecord, Table, WorkflowError,
};
use crate::store::UnitOfWork;

pub const WORKFLOW: &str = "reindex";

pub const LIBRARY_TABLE: &str = "library_table";
pub const BARCODE_TABLE: &str = "barcode_table";
pub const KIT_TABLE: &str = "kit_table";

/// Form field prefix of the index kit mapping, e.g. `kit_mapping-TT Set A`
pub const KIT_MAPPING_PREFIX: &str = "kit_mapping-";

pub fn workflow() -> Workflow {
    Workflow::new(WORKFLOW)
        .step(SelectLibraries)
        .step(BarcodeInput)
        .step(IndexKitMapping)
        .step(CompleteReindex)
}

fn library_columns() -> Vec<Column> {
    vec![
        Column::new("library_id", ColumnType::Int),
        Column::new("library_name", ColumnType::Text),
        Column::new("seq_request_id", ColumnType::Int),
        Column::new("index_kit", ColumnType::Text),
        Column::new("index_well", ColumnType::Text),
        Column::new("sequence_i7", ColumnType::Text),
        Column::new("sequence_i5", ColumnType::Text),
    ]
}

fn barcode_columns() -> Vec<Column> {
    vec![
        Column::new("library_id", ColumnType::Int),
        Column::new("library_name", ColumnType::Text),
        Column::new("sequence_i7", ColumnType::Text),
        Column::new("sequence_i5", ColumnType::Text),
        Column::new("index_kit", ColumnType::Text),
        Column::new("index_well", ColumnType::Text),
    ]
}

fn text(row: &[Cell], table: &Table, column: &str) -> Option<String> {
    table
        .column_index(column)
        .and_then(|idx| row.get(idx))
        .and_then(Cell::as_str)
        .map(str::to_string)
}

fn int(row: &[Cell], table: &Table, column: &str) -> Option<i64> {
    table
        .column_index(column)
        .and_then(|idx| row.get(idx))
        .and_then(Cell::as_int)
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Upper-cased sequence, or None if it holds anything but A, C, G, T or N
pub fn normalize_sequence(raw: &str) -> Option<String> {
    let sequence = raw.trim().to_ascii_uppercase();
    if sequence.is_empty() || !sequence.chars().all(|c| matches!(c, 'A' | 'C' | 'G' | 'T' | 'N')) {
        return None;
    }
    Some(sequence)
}

/// First step: which libraries are re-indexed
pub struct SelectLibraries;

impl SelectLibraries {
    pub const STEP: &'static str = "select_libraries";

    /// Split submitted ids; values may hold several comma or space separated ids
    pub fn parse_ids(raw: &[&str], errors: &mut FormErrors) -> Vec<EntityId> {
        let mut ids = Vec::new();
        for token in raw
            .iter()
            .flat_map(|value| value.split(|c: char| c == ',' || c.is_whitespace()))
            .filter(|token| !token.is_empty())
        {
            match token.parse::<EntityId>() {
                Ok(id) => ids.push(id),
                Err(_) => errors.add("library_ids", format!("'{}' is not a valid library id.", token)),
            }
        }
        ids.into_iter().unique().collect()
    }

    /// Ids restored by `fill_previous_form`
    pub fn prefilled_ids(args: &StepArgs) -> Vec<EntityId> {
        args.get("library_ids")
            .and_then(|ids| ids.as_array())
            .map(|ids| ids.iter().filter_map(|id| id.as_i64()).collect())
            .unwrap_or_default()
    }

    /// Look the selection up and build `library_table`
    pub async fn library_table(
        &self,
        uow: &dyn UnitOfWork,
        raw_ids: &[&str],
    ) -> Result<(Table, FormErrors)> {
        let mut errors = FormErrors::new();
        let ids = Self::parse_ids(raw_ids, &mut errors);
        if ids.is_empty() && errors.is_empty() {
            errors.add("library_ids", "Select at least one library.");
        }

        let mut table = Table::new(library_columns());
        for id in ids {
            match uow.get_library(id).await? {
                Some(library) => table.push_row(library_row(&library))?,
                None => errors.add("library_ids", format!("Library {} does not exist.", id)),
            }
        }
        Ok((table, errors))
    }
}

fn library_row(library: &Library) -> Vec<Cell> {
    vec![
        Cell::Int(library.id),
        Cell::text(&library.name),
        library.seq_request_id.into(),
        library.index_kit.clone().into(),
        library.index_well.clone().into(),
        library.sequence_i7.clone().into(),
        library.sequence_i5.clone().into(),
    ]
}

impl WorkflowStep for SelectLibraries {
    fn step_name(&self) -> &'static str {
        Self::STEP
    }

    /// Carries the previously selected ids in `library_ids`
    fn fill_previous_form(&self, record: &StepRecord) -> StepArgs {
        let mut args = record.args.clone();
        if let Some(table) = record.tables.get(LIBRARY_TABLE) {
            let ids: Vec<EntityId> = table
                .rows
                .iter()
                .filter_map(|row| int(row, table, "library_id"))
                .collect();
            args.insert("library_ids".to_string(), serde_json::json!(ids));
        }
        args
    }
}

/// One parsed line of barcode input
#[derive(Debug, Clone, PartialEq)]
pub struct BarcodeRow {
    pub library_id: EntityId,
    pub sequence_i7: String,
    pub sequence_i5: Option<String>,
    pub index_kit: Option<String>,
    pub index_well: Option<String>,
}

/// Second step: new barcodes as `library_id,sequence_i7,sequence_i5[,index_kit,index_well]` lines
pub struct BarcodeInput;

impl BarcodeInput {
    pub const STEP: &'static str = "barcode_input";
    pub const FIELD: &'static str = "barcodes";

    pub fn parse(input: &str, errors: &mut FormErrors) -> Vec<BarcodeRow> {
        let mut rows = Vec::new();
        for (n, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("library_id") || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(|c| c == ',' || c == '\t').map(str::trim).collect();
            if !(2..=5).contains(&fields.len()) {
                errors.add(Self::FIELD, format!("Line {}: expected 2 to 5 fields, found {}.", n + 1, fields.len()));
                continue;
            }

            let Ok(library_id) = fields[0].parse::<EntityId>() else {
                errors.add(Self::FIELD, format!("Line {}: '{}' is not a library id.", n + 1, fields[0]));
                continue;
            };
            let Some(sequence_i7) = normalize_sequence(fields[1]) else {
                errors.add(Self::FIELD, format!("Line {}: invalid i7 sequence '{}'.", n + 1, fields[1]));
                continue;
            };
            let sequence_i5 = match fields.get(2).copied().and_then(non_empty) {
                None => None,
                Some(raw) => match normalize_sequence(raw) {
                    Some(seq) => Some(seq),
                    None => {
                        errors.add(Self::FIELD, format!("Line {}: invalid i5 sequence '{}'.", n + 1, raw));
                        continue;
                    }
                },
            };

            rows.push(BarcodeRow {
                library_id,
                sequence_i7,
                sequence_i5,
                index_kit: fields.get(3).copied().and_then(non_empty).map(str::to_string),
                index_well: fields.get(4).copied().and_then(non_empty).map(str::to_string),
            });
        }
        rows
    }

    /// Validate `input` against the selected libraries and write `barcode_table`
    pub fn process(&self, form: &mut MultiStepForm, input: &str) -> Result<FormErrors> {
        let mut errors = FormErrors::new();
        let rows = Self::parse(input, &mut errors);

        let library_table = form.require_table(LIBRARY_TABLE)?;
        let names: BTreeMap<EntityId, String> = library_table
            .rows
            .iter()
            .filter_map(|row| {
                Some((
                    int(row, library_table, "library_id")?,
                    text(row, library_table, "library_name").unwrap_or_default(),
                ))
            })
            .collect();

        let mut seen = BTreeSet::new();
        for row in &rows {
            if !names.contains_key(&row.library_id) {
                errors.add(Self::FIELD, format!("Library {} was not selected.", row.library_id));
            } else if !seen.insert(row.library_id) {
                errors.add(Self::FIELD, format!("Library {} is listed more than once.", row.library_id));
            }
        }
        for id in names.keys().filter(|id| !seen.contains(id)) {
            errors.add(Self::FIELD, format!("Missing barcodes for library {}.", id));
        }
        if !errors.is_empty() {
            return Ok(errors);
        }

        let mut table = Table::new(barcode_columns());
        for row in rows {
            let name = names.get(&row.library_id).cloned().unwrap_or_default();
            table.push_row(vec![
                Cell::Int(row.library_id),
                Cell::text(name),
                Cell::text(row.sequence_i7),
                row.sequence_i5.into(),
                row.index_kit.into(),
                row.index_well.into(),
            ])?;
        }
        form.add_table(BARCODE_TABLE, table);
        form.set_metadata("index_col", "sequence_i7");
        Ok(errors)
    }
}

impl WorkflowStep for BarcodeInput {
    fn step_name(&self) -> &'static str {
        Self::STEP
    }
}

/// Third step: map kit labels used in the barcode input onto kit names
pub struct IndexKitMapping;

impl IndexKitMapping {
    pub const STEP: &'static str = "index_kit_mapping";

    /// Distinct kit labels referenced by `barcode_table`, in first-seen order
    pub fn kit_labels(form: &MultiStepForm) -> Vec<String> {
        let Some(table) = form.table(BARCODE_TABLE) else {
            return Vec::new();
        };
        match table.column("index_kit") {
            Ok(cells) => cells
                .filter_map(Cell::as_str)
                .map(str::to_string)
                .unique()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// `fields` are the submitted form pairs; only `kit_mapping-<label>` entries are read
    pub fn process(&self, form: &mut MultiStepForm, fields: &[(String, String)]) -> Result<FormErrors> {
        let mut errors = FormErrors::new();
        let submitted: BTreeMap<&str, &str> = fields
            .iter()
            .filter_map(|(k, v)| Some((k.strip_prefix(KIT_MAPPING_PREFIX)?, v.trim())))
            .collect();

        let mut mapping = BTreeMap::new();
        for label in Self::kit_labels(form) {
            match submitted.get(label.as_str()).copied().and_then(non_empty) {
                Some(kit) => {
                    mapping.insert(label, kit.to_string());
                }
                None => errors.add(
                    format!("{}{}", KIT_MAPPING_PREFIX, label),
                    format!("Select an index kit for '{}'.", label),
                ),
            }
        }
        if !errors.is_empty() {
            return Ok(errors);
        }

        let mut kit_table = Table::new(vec![
            Column::new("label", ColumnType::Text),
            Column::new("index_kit", ColumnType::Text),
        ]);
        for (label, kit) in &mapping {
            kit_table.push_row(vec![Cell::text(label), Cell::text(kit)])?;
        }

        let mut barcode_table = form.require_table(BARCODE_TABLE)?.clone();
        for row in 0..barcode_table.len() {
            let label = barcode_table
                .get(row, "index_kit")
                .and_then(Cell::as_str)
                .map(str::to_string);
            if let Some(kit) = label.and_then(|l| mapping.get(&l)) {
                barcode_table.set(row, "index_kit", Cell::text(kit))?;
            }
        }

        form.add_table(KIT_TABLE, kit_table);
        form.update_table(BARCODE_TABLE, barcode_table)?;
        Ok(errors)
    }
}

impl WorkflowStep for IndexKitMapping {
    fn step_name(&self) -> &'static str {
        Self::STEP
    }

    fn is_applicable(&self, previous: &MultiStepForm) -> bool {
        !Self::kit_labels(previous).is_empty()
    }
}

/// Terminal step: write the new indices through the unit-of-work
pub struct CompleteReindex;

impl CompleteReindex {
    pub const STEP: &'static str = "complete_reindex";

    /// Stage `barcode_table` onto the libraries through `uow`.
    /// Returns how many libraries were updated; completing the session is
    /// left to the caller once the writes are committed.
    pub async fn process(&self, form: &MultiStepForm, uow: &dyn UnitOfWork) -> Result<usize> {
        let table = form.require_table(BARCODE_TABLE)?;

        let mut updated = 0;
        for row in &table.rows {
            let Some(library_id) = int(row, table, "library_id") else {
                continue;
            };
            let mut library = uow.get_library(library_id).await?.ok_or_else(|| {
                log::error!("{}: library {} no longer exists", form.uuid(), library_id);
                WorkflowError::MissingReference(format!("library {}", library_id))
            })?;

            library.sequence_i7 = text(row, table, "sequence_i7");
            library.sequence_i5 = text(row, table, "sequence_i5");
            library.index_kit = text(row, table, "index_kit");
            library.index_well = text(row, table, "index_well");
            uow.update_library(library).await?;
            updated += 1;
        }

        Ok(updated)
    }
}

impl WorkflowStep for CompleteReindex {
    fn step_name(&self) -> &'static str {
        Self::STEP
    }
}
