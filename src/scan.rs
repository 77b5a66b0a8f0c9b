//! Filesystem scan for GPT-SoVITS voice model weights.

use crate::log_debug;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

// Layouts used by GPT-SoVITS installs across versions.
const WEIGHT_DIRS: &[&str] = &[
    "GPT_weights",
    "GPT_weights_v2",
    "GPT_weights_v3",
    "SoVITS_weights",
    "SoVITS_weights_v2",
    "SoVITS_weights_v3",
    "pretrained_models",
];

const MAX_SCAN_DEPTH: usize = 4;

/// Model files found under a scan root, sorted and deduplicated.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ModelScan {
    pub gpt: Vec<String>,
    pub sovits: Vec<String>,
}

/// Walk `base` (or the current directory) plus the conventional weight
/// subdirectories and classify every model file found. Missing or unreadable
/// directories contribute nothing; a machine without models gets empty lists.
pub fn scan_models(base: Option<&Path>) -> ModelScan {
    let root = base.unwrap_or_else(|| Path::new("."));
    let mut gpt = BTreeSet::new();
    let mut sovits = BTreeSet::new();

    walk(root, 0, &mut gpt, &mut sovits);
    for dir in WEIGHT_DIRS {
        walk(&root.join(dir), 0, &mut gpt, &mut sovits);
    }

    ModelScan {
        gpt: gpt.into_iter().collect(),
        sovits: sovits.into_iter().collect(),
    }
}

fn walk(dir: &Path, depth: usize, gpt: &mut BTreeSet<String>, sovits: &mut BTreeSet<String>) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            if depth == 0 {
                log_debug(&format!("model scan skipping {}: {err}", dir.display()));
            }
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            walk(&path, depth + 1, gpt, sovits);
            continue;
        }
        match classify(&name) {
            Some(ModelKind::Gpt) => {
                gpt.insert(path.to_string_lossy().into_owned());
            }
            Some(ModelKind::Sovits) => {
                sovits.insert(path.to_string_lossy().into_owned());
            }
            None => {}
        }
    }
}

enum ModelKind {
    Gpt,
    Sovits,
}

/// `.ckpt` files are GPT weights. `.pth` files count as SoVITS weights when
/// the name looks like a generator checkpoint; discriminator checkpoints
/// (`d_` prefix) never do.
fn classify(file_name: &str) -> Option<ModelKind> {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".ckpt") {
        return Some(ModelKind::Gpt);
    }
    if !lower.ends_with(".pth") {
        return None;
    }
    if lower.contains("d_") {
        return None;
    }
    let generator_like = lower.contains("sovits")
        || lower.contains("s2")
        || lower.contains("g_")
        || lower.contains("model");
    generator_like.then_some(ModelKind::Sovits)
}
