use {crate::canon_id, serde::Serialize, std::fmt};

/// A parsed modifier target path: a base property plus an optional
/// resource/entity parameter (`nodeOutput[gold]`). The legacy dotted form
/// (`nodeOutput.gold`) is still accepted at the parse boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TargetPath {
    pub base: String,
    pub param: Option<String>,
}

impl TargetPath {
    pub fn of(base: &str) -> Self {
        Self {
            base: base.trim().to_string(),
            param: None,
        }
    }

    pub fn with_param(base: &str, param: &str) -> Self {
        Self {
            base: base.trim().to_string(),
            param: Some(canon_id(param)),
        }
    }

    /// Parses `base`, `base[param]` or `base.param`. Anything else is a
    /// configuration error the caller must surface at content-load time.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("target path is empty".into());
        }

        if let Some(open) = raw.find('[') {
            let Some(stripped) = raw.strip_suffix(']') else {
                return Err(format!("missing closing bracket in `{raw}`"));
            };
            let base = &stripped[..open];
            let param = &stripped[open + 1..];
            if base.is_empty() || param.is_empty() {
                return Err(format!("empty base or parameter in `{raw}`"));
            }
            if param.contains('[') || param.contains(']') {
                return Err(format!("nested brackets in `{raw}`"));
            }
            return Ok(Self::with_param(base, param));
        }
        if raw.contains(']') {
            return Err(format!("unbalanced bracket in `{raw}`"));
        }

        if let Some((base, param)) = raw.split_once('.') {
            if base.is_empty() || param.is_empty() || param.contains('.') {
                return Err(format!("malformed dotted path `{raw}`"));
            }
            return Ok(Self::with_param(base, param));
        }

        Ok(Self::of(raw))
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.param {
            Some(param) => write!(f, "{}[{}]", self.base, param),
            None => write!(f, "{}", self.base),
        }
    }
}
