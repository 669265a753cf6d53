use relaygate_common::GlobalConfig;

pub(crate) fn resolve_data_dir(value: Option<&str>) -> String {
    match value {
        Some(value) if !value.trim().is_empty() => value.to_string(),
        _ => GlobalConfig::default().data_dir,
    }
}
