use anyhow::{Result, anyhow};
use uuid::Uuid;

pub fn validate_user_id(user_id: &str) -> Result<()> {
    Uuid::parse_str(user_id).map_err(|_| anyhow!("user_id must be a valid UUID"))?;
    Ok(())
}

pub fn validate_template_code(template_code: &str) -> Result<()> {
    if template_code.is_empty() {
        return Err(anyhow!("template_code cannot be empty"));
    }

    if template_code.len() > 100 {
        return Err(anyhow!("template_code too long (maximum 100 characters)"));
    }

    let valid_chars = template_code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');

    if !valid_chars {
        return Err(anyhow!("template_code contains invalid characters"));
    }

    // Used as a URL path segment.
    if template_code == "." || template_code == ".." {
        return Err(anyhow!("template_code cannot be a relative path segment"));
    }

    Ok(())
}

pub fn validate_request_id(request_id: &str) -> Result<()> {
    if request_id.trim().is_empty() {
        return Err(anyhow!("request_id cannot be empty"));
    }

    if request_id.len() > 255 {
        return Err(anyhow!("request_id too long (maximum 255 characters)"));
    }

    Ok(())
}

pub fn validate_push_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(anyhow!("Device token cannot be empty"));
    }

    if token.len() < 20 {
        return Err(anyhow!("Device token too short (minimum 20 characters)"));
    }

    if token.len() > 200 {
        return Err(anyhow!("Device token too long (maximum 200 characters)"));
    }

    let valid_chars = token
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '.');

    if !valid_chars {
        return Err(anyhow!("Device token contains invalid characters"));
    }

    Ok(())
}
