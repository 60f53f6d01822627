/// Embedding model download from the HuggingFace hub.
///
/// Fetches the ONNX export and tokenizer of the configured model into a
/// local cache directory the first time it is needed.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

const HF_BASE: &str = "https://huggingface.co";

/// Local file name and path inside the model repository.
const MODEL_FILES: &[(&str, &str)] = &[
    ("model.onnx", "onnx/model.onnx"),
    ("tokenizer.json", "tokenizer.json"),
    ("config.json", "config.json"),
];

/// Cache directory for `model_name` under `models_dir`.
///
/// `sentence-transformers/all-MiniLM-L6-v2` maps to
/// `<models_dir>/sentence-transformers__all-MiniLM-L6-v2`.
#[must_use]
pub fn model_dir(models_dir: &Path, model_name: &str) -> PathBuf {
    models_dir.join(model_name.replace('/', "__"))
}

#[must_use]
pub fn all_files_present(model_dir: &Path) -> bool {
    MODEL_FILES
        .iter()
        .all(|(name, _)| model_dir.join(name).exists())
}

fn file_url(model_name: &str, repo_path: &str) -> String {
    format!("{HF_BASE}/{model_name}/resolve/main/{repo_path}")
}

/// Download any missing model files for `model_name` into `model_dir`.
pub fn download_model_files(model_name: &str, model_dir: &Path) -> Result<()> {
    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create models directory: {}", model_dir.display()))?;

    if all_files_present(model_dir) {
        info!("Model files found in {}", model_dir.display());
        return Ok(());
    }

    info!("Downloading {model_name} from HuggingFace (one-time)...");

    for &(filename, repo_path) in MODEL_FILES {
        let dest = model_dir.join(filename);
        if dest.exists() {
            continue;
        }

        let url = file_url(model_name, repo_path);
        info!("Downloading {filename}");
        download_file(&dest, &url).with_context(|| format!("failed to download {filename}"))?;
    }

    info!("Model download complete");
    Ok(())
}

/// Download a single file with a progress bar, writing through a temp file.
fn download_file(dest: &Path, url: &str) -> Result<()> {
    let mut resp =
        reqwest::blocking::get(url).with_context(|| format!("HTTP request failed: {url}"))?;

    if !resp.status().is_success() {
        anyhow::bail!("bad status: {} for {url}", resp.status());
    }

    let pb = match resp.content_length() {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {percent}% ({bytes}/{total_bytes}) {msg}")?
                    .progress_chars("█▓░"),
            );
            pb
        }
        _ => ProgressBar::new_spinner(),
    };

    let partial = dest.with_extension("part");
    let file = fs::File::create(&partial)
        .with_context(|| format!("failed to create file: {}", partial.display()))?;
    let mut writer = pb.wrap_write(file);
    resp.copy_to(&mut writer).context("failed to read response body")?;
    writer.flush().context("failed to write file")?;
    pb.finish_and_clear();

    fs::rename(&partial, dest)
        .with_context(|| format!("failed to move {} into place", partial.display()))?;
    Ok(())
}
