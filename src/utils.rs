use indicatif::ProgressStyle;

/// Style of the root progress bar counting finished tasks.
pub(crate) fn get_style_build() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Style of a single running task, a spinner with no progress.
pub(crate) fn get_style_task() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{span_child_prefix}{spinner:.dim} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
