use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::incident::{AnalysisStatus, IncidentStatus, MrStatus, PatchStatus};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn incident_status_cell(status: IncidentStatus) -> Cell {
    match status {
        IncidentStatus::Open => Cell::new("open").fg(TableColor::Red),
        IncidentStatus::InProgress => Cell::new("in progress").fg(TableColor::Yellow),
        IncidentStatus::Resolved => Cell::new("resolved").fg(TableColor::Green),
    }
}

pub fn analysis_status_cell(status: AnalysisStatus) -> Cell {
    match status {
        AnalysisStatus::Pending => Cell::new("pending").fg(TableColor::DarkGrey),
        AnalysisStatus::Running => Cell::new("running").fg(TableColor::Yellow),
        AnalysisStatus::Done => Cell::new("done").fg(TableColor::Green),
        AnalysisStatus::Failed => Cell::new("failed").fg(TableColor::Red),
    }
}

pub fn patch_status_cell(status: PatchStatus) -> Cell {
    match status {
        PatchStatus::Pending => Cell::new("pending").fg(TableColor::DarkGrey),
        PatchStatus::Running => Cell::new("running").fg(TableColor::Yellow),
        PatchStatus::Ready => Cell::new("ready").fg(TableColor::Green),
        PatchStatus::Failed => Cell::new("failed").fg(TableColor::Red),
    }
}

pub fn mr_status_cell(status: MrStatus) -> Cell {
    match status {
        MrStatus::NotRequested => Cell::new("-").fg(TableColor::DarkGrey),
        MrStatus::Open => Cell::new("open").fg(TableColor::Cyan),
        MrStatus::Fixing => Cell::new("fixing").fg(TableColor::Yellow),
        MrStatus::Resolved => Cell::new("resolved").fg(TableColor::Green),
        MrStatus::Failed => Cell::new("failed").fg(TableColor::Red),
    }
}

pub fn confidence_cell(confidence: f64) -> Cell {
    let text = format!("{:.0}%", confidence * 100.0);
    if confidence >= 0.7 {
        Cell::new(text).fg(TableColor::Green)
    } else if confidence >= 0.4 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Red)
    }
}
