use serde::Deserialize;
use serde_json::Value;
use shaderscene::{ShaderSourcePair, ShaderSubmission, ShapeKind};

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("shader code could not be parsed: {0}")]
    MissingShaderCode(String),
}

/// Layout returned by the shader generator service.
#[derive(Debug, Deserialize)]
struct GeneratorResponse {
    shader_code: Option<GeneratedCode>,
}

#[derive(Debug, Deserialize)]
struct GeneratedCode {
    vertex_shader: Option<GeneratedStage>,
    fragment_shader: Option<GeneratedStage>,
    #[serde(default)]
    shape: ShapeKind,
}

#[derive(Debug, Deserialize)]
struct GeneratedStage {
    background: Option<String>,
    object: Option<String>,
}

/// Decodes a submission file. Accepts either a [`ShaderSubmission`] or the
/// generator's `shader_code` response.
pub fn parse_submission(input: &str) -> Result<ShaderSubmission, ResponseError> {
    let value: Value = serde_json::from_str(input)?;
    if value.get("shader_code").is_some() {
        let response: GeneratorResponse = serde_json::from_value(value)
            .map_err(|err| ResponseError::MissingShaderCode(err.to_string()))?;
        return from_generator(response);
    }

    serde_json::from_value(value).map_err(|err| ResponseError::MissingShaderCode(err.to_string()))
}

fn from_generator(response: GeneratorResponse) -> Result<ShaderSubmission, ResponseError> {
    let code = response
        .shader_code
        .ok_or_else(|| ResponseError::MissingShaderCode("shader_code is null".into()))?;
    let vertex = code
        .vertex_shader
        .ok_or_else(|| ResponseError::MissingShaderCode("missing vertex_shader".into()))?;
    let fragment = code
        .fragment_shader
        .ok_or_else(|| ResponseError::MissingShaderCode("missing fragment_shader".into()))?;

    let background = ShaderSourcePair::new(
        required(vertex.background, "vertex_shader.background")?,
        required(fragment.background, "fragment_shader.background")?,
    );
    let object = ShaderSourcePair::new(
        required(vertex.object, "vertex_shader.object")?,
        required(fragment.object, "fragment_shader.object")?,
    );
    Ok(ShaderSubmission {
        background,
        object,
        shape: code.shape,
    })
}

fn required(source: Option<String>, field: &str) -> Result<String, ResponseError> {
    match source {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ResponseError::MissingShaderCode(format!("missing {field}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_submission_layout() {
        let submission = parse_submission(
            r#"{
                "background": {"vertexSource": "void main() {}", "fragmentSource": "void main() {}"},
                "object": {"vertexSource": "void main() {}", "fragmentSource": "void main() {}"},
                "shape": "sphere"
            }"#,
        )
        .unwrap();
        assert_eq!(submission.shape, ShapeKind::Sphere);
        assert_eq!(submission.object.vertex_source, "void main() {}");
    }

    #[test]
    fn parses_generator_layout() {
        let submission = parse_submission(
            r#"{"shader_code": {
                "vertex_shader": {"background": "bg-vs", "object": "obj-vs"},
                "fragment_shader": {"background": "bg-fs", "object": "obj-fs"},
                "shape": "torus"
            }}"#,
        )
        .unwrap();
        assert_eq!(submission.background, ShaderSourcePair::new("bg-vs", "bg-fs"));
        assert_eq!(submission.object, ShaderSourcePair::new("obj-vs", "obj-fs"));
        assert_eq!(submission.shape, ShapeKind::Torus);
    }

    #[test]
    fn generator_shape_defaults_to_cube() {
        let submission = parse_submission(
            r#"{"shader_code": {
                "vertex_shader": {"background": "a", "object": "b"},
                "fragment_shader": {"background": "c", "object": "d"},
                "shape": "dodecahedron"
            }}"#,
        )
        .unwrap();
        assert_eq!(submission.shape, ShapeKind::Cube);
    }

    #[test]
    fn non_string_shapes_default_to_cube() {
        for shape in ["null", "3"] {
            let generator = format!(
                r#"{{"shader_code": {{
                    "vertex_shader": {{"background": "a", "object": "b"}},
                    "fragment_shader": {{"background": "c", "object": "d"}},
                    "shape": {shape}
                }}}}"#
            );
            assert_eq!(parse_submission(&generator).unwrap().shape, ShapeKind::Cube);

            let submission = format!(
                r#"{{
                    "background": {{"vertexSource": "a", "fragmentSource": "c"}},
                    "object": {{"vertexSource": "b", "fragmentSource": "d"}},
                    "shape": {shape}
                }}"#
            );
            assert_eq!(parse_submission(&submission).unwrap().shape, ShapeKind::Cube);
        }
    }

    #[test]
    fn missing_source_is_a_parse_failure() {
        let err = parse_submission(
            r#"{"shader_code": {
                "vertex_shader": {"background": "a", "object": "b"},
                "fragment_shader": {"background": "c"}
            }}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ResponseError::MissingShaderCode(_)));
        assert!(err.to_string().starts_with("shader code could not be parsed"));

        let err = parse_submission(r#"{"shader_code": null}"#).unwrap_err();
        assert!(matches!(err, ResponseError::MissingShaderCode(_)));

        let err = parse_submission(r#"{"background": {}}"#).unwrap_err();
        assert!(matches!(err, ResponseError::MissingShaderCode(_)));
    }

    #[test]
    fn invalid_json_is_reported() {
        let err = parse_submission("{not json").unwrap_err();
        assert!(matches!(err, ResponseError::Json(_)));
    }
}
