use relaygate_protocol::{UnifiedRequest, Usage};

/// Upper-bound charge reserved before dispatch.
pub fn estimate_cost(
    request: &UnifiedRequest,
    prompt_tokens: u64,
    pre_consumed_tokens: u32,
    ratio: f64,
) -> i64 {
    let tokens = pre_consumed_tokens as u64 + prompt_tokens + request.max_tokens.unwrap_or(0) as u64;
    to_quota(tokens as f64 * ratio)
}

pub fn image_size_ratio(size: &str) -> f64 {
    match size {
        "256x256" => 1.0,
        "512x512" => 1.125,
        "1024x1024" => 1.25,
        _ => 1.0,
    }
}

/// Per-image price; image requests settle at this amount.
pub fn image_quota(request: &UnifiedRequest, model_ratio: f64, channel_ratio: f64) -> i64 {
    let size_ratio = image_size_ratio(request.size.as_deref().unwrap_or_default());
    let n = request.n.unwrap_or(1).max(1) as f64;
    to_quota(model_ratio * channel_ratio * size_ratio * 1000.0 * n)
}

pub fn final_quota(
    usage: &Usage,
    model_ratio: f64,
    completion_ratio: f64,
    channel_ratio: f64,
) -> i64 {
    if usage.prompt_tokens + usage.completion_tokens == 0 {
        return 0;
    }
    let ratio = model_ratio * channel_ratio;
    let weighted =
        usage.prompt_tokens as f64 + usage.completion_tokens as f64 * completion_ratio;
    let quota = to_quota(weighted * ratio);
    if ratio != 0.0 && quota <= 0 { 1 } else { quota }
}

fn to_quota(value: f64) -> i64 {
    if value.is_finite() && value > 0.0 {
        value.ceil() as i64
    } else {
        0
    }
}
