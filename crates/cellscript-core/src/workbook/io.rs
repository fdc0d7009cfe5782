//! Workbook persistence: open and save against the sectioned text format.

use std::fs;
use std::path::{Path, PathBuf};

use cellscript_engine::engine::CellKey;

use crate::error::Result;
use crate::storage::{parse_workbook, render_workbook, SavePayload};


use super::state::{CellAttrs, Workbook};

impl Workbook {
    /// Open a workbook file and apply its sheet scripts. The dependency
    /// graph is not persisted; it is rebuilt by lazy evaluation.
    pub fn open(path: impl AsRef<Path>) -> Result<Workbook> {
        Workbook::open_with(path, false)
    }

    /// Open without evaluating anything: sheet scripts are stored but not
    /// run, and every cell reads as its raw text.
    pub fn open_safe(path: impl AsRef<Path>) -> Result<Workbook> {
        Workbook::open_with(path, true)
    }

    fn open_with(path: impl AsRef<Path>, safe_mode: bool) -> Result<Workbook> {
        let path = path.as_ref();
        let loaded = parse_workbook(path)?;

        let mut workbook = Workbook::new(loaded.shape)?;
        workbook
            .shared
            .safe_mode
            .store(safe_mode, std::sync::atomic::Ordering::Relaxed);
        *workbook.shared.mode.lock().expect("mode lock poisoned") = loaded.mode;

        {
            let mut sheets = workbook
                .shared
                .sheets
                .lock()
                .expect("sheets lock poisoned");
            for (index, name) in loaded.sheet_names.iter().enumerate() {
                sheets[index].name = name.clone();
            }
            for (index, source) in &loaded.sheet_scripts {
                sheets[*index].script = source.clone();
            }
        }

        for (key, text) in loaded.cells {
            workbook.shared.store.insert(key, text);
        }
        for (key, name, value) in loaded.attributes {
            workbook
                .shared
                .attrs
                .entry(key)
                .or_insert_with(CellAttrs::default)
                .props
                .insert(name, value);
        }

        if !safe_mode {
            // Rebuild each sheet's globals; a failing script surfaces later
            // through its cells, not as a load failure.
            let scripts: Vec<(u32, String)> = {
                let sheets = workbook
                    .shared
                    .sheets
                    .lock()
                    .expect("sheets lock poisoned");
                sheets
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| !s.script.is_empty())
                    .map(|(i, s)| (i as u32, s.script.clone()))
                    .collect()
            };
            for (sheet, source) in scripts {
                let _ = workbook.apply_script(sheet, &source);
            }
        }

        workbook.file_path = Some(path.to_path_buf());
        workbook.modified = false;
        Ok(workbook)
    }

    /// Save to the current file path. Returns user-visible warnings, e.g.
    /// sheets with unsaved script drafts (drafts are never persisted).
    pub fn save(&mut self) -> Result<Vec<String>> {
        let path = self
            .file_path
            .clone()
            .ok_or(crate::error::CoreError::NoFilePath)?;
        self.save_to(path)
    }

    /// Save to `path` and make it the current file path.
    pub fn save_to(&mut self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let mut warnings = Vec::new();

        let (sheet_names, sheet_scripts) = {
            let sheets = self.shared.sheets.lock().expect("sheets lock poisoned");
            let names: Vec<String> = sheets.iter().map(|s| s.name.clone()).collect();
            let scripts: Vec<(String, String)> = sheets
                .iter()
                .filter(|s| !s.script.is_empty())
                .map(|s| (s.name.clone(), s.script.clone()))
                .collect();
            for sheet in sheets.iter() {
                if let Some(draft) = &sheet.draft {
                    if *draft != sheet.script {
                        warnings.push(format!(
                            "sheet '{}' has unapplied script draft edits; drafts are not saved",
                            sheet.name
                        ));
                    }
                }
            }
            (names, scripts)
        };

        let mut cells: Vec<(CellKey, String)> = self
            .shared
            .store
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        cells.sort_by_key(|(k, _)| (k.sheet, k.row, k.col));

        let mut attributes: Vec<(CellKey, String, String)> = self
            .shared
            .attrs
            .iter()
            .flat_map(|entry| {
                let key = *entry.key();
                entry
                    .value()
                    .props
                    .iter()
                    .map(move |(n, v)| (key, n.clone(), v.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        attributes.sort_by_key(|(k, n, _)| (k.sheet, k.row, k.col, n.clone()));

        let payload = SavePayload {
            shape: self.shared.shape,
            sheet_names,
            cells,
            attributes,
            sheet_scripts,
            mode: self.shared.mode(),
        };

        fs::write(&path, render_workbook(&payload))?;
        self.file_path = Some(path);
        self.modified = false;
        Ok(warnings)
    }
}
