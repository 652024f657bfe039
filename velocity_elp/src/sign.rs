use crate::error::Error::InvalidSign;
use crate::error::Result;
use std::fmt;
use std::str::FromStr;

/// A structured identifier for any addressable symbol.
///
/// Syntax: `module_path::type_path.member[type_params](param_types)` where each segment is
/// optional after its first divider. Two signatures are equal iff all component sequences are
/// equal. Signatures are immutable once constructed.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Sign {
    module: Vec<String>,
    path: Vec<String>,
    type_params: Vec<String>,
    params: Option<Vec<String>>,
}

fn is_segment_char(character: char) -> bool {
    character.is_alphanumeric() || matches!(character, '_' | '$' | '<' | '>')
}

fn is_type_name_char(character: char) -> bool {
    is_segment_char(character) || matches!(character, '.' | ':')
}

fn parse_segment(segment: &str, sign: &str) -> Result<String> {
    if segment.is_empty() || !segment.chars().all(is_segment_char) {
        return Err(InvalidSign(sign.to_string()));
    }
    Ok(segment.to_string())
}

fn parse_type_name(name: &str, sign: &str) -> Result<String> {
    if name.is_empty() || !name.chars().all(is_type_name_char) {
        return Err(InvalidSign(sign.to_string()));
    }
    Ok(name.to_string())
}

impl Sign {
    /// Parse a signature from its textual form.
    ///
    /// # Errors
    /// Returns `InvalidSign` if the text does not follow the signature grammar.
    pub fn parse<S: AsRef<str>>(sign: S) -> Result<Sign> {
        sign.as_ref().parse()
    }

    /// The module path segments; empty for signs with no module part.
    #[must_use]
    pub fn module(&self) -> &[String] {
        &self.module
    }

    /// The module path joined with `.`.
    #[must_use]
    pub fn module_name(&self) -> String {
        self.module.join(".")
    }

    /// The type-and-member path segments.
    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The member name: the final path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.last().map_or("", String::as_str)
    }

    /// The type parameter names.
    #[must_use]
    pub fn type_params(&self) -> &[String] {
        &self.type_params
    }

    /// The parameter type names; `None` when the sign does not name a callable.
    #[must_use]
    pub fn params(&self) -> Option<&[String]> {
        self.params.as_deref()
    }

    /// Whether the sign names a callable (carries a parameter list, possibly empty).
    #[must_use]
    pub fn is_callable(&self) -> bool {
        self.params.is_some()
    }

    /// Whether two callable signs take the same parameters: equal type-parameter arity and
    /// structurally equal parameter type sequences.
    #[must_use]
    pub fn parameters_match(&self, other: &Sign) -> bool {
        self.type_params.len() == other.type_params.len() && self.params == other.params
    }
}

impl FromStr for Sign {
    type Err = crate::Error;

    fn from_str(sign: &str) -> Result<Self> {
        let text = sign.trim();
        if text.is_empty() {
            return Err(InvalidSign(sign.to_string()));
        }

        let (text, params) = if let Some(text) = text.strip_suffix(')') {
            let (text, params_text) = text
                .rsplit_once('(')
                .ok_or_else(|| InvalidSign(sign.to_string()))?;
            let params = if params_text.trim().is_empty() {
                Vec::new()
            } else {
                params_text
                    .split(',')
                    .map(|name| parse_type_name(name.trim(), sign))
                    .collect::<Result<Vec<_>>>()?
            };
            (text, Some(params))
        } else {
            (text, None)
        };

        let (text, type_params) = if let Some(text) = text.strip_suffix(']') {
            let (text, type_params_text) = text
                .rsplit_once('[')
                .ok_or_else(|| InvalidSign(sign.to_string()))?;
            let type_params = if type_params_text.trim().is_empty() {
                Vec::new()
            } else {
                type_params_text
                    .split(',')
                    .map(|name| parse_segment(name.trim(), sign))
                    .collect::<Result<Vec<_>>>()?
            };
            (text, type_params)
        } else {
            (text, Vec::new())
        };

        let (module_text, path_text) = match text.split_once("::") {
            Some((module_text, path_text)) => (module_text, path_text),
            None => ("", text),
        };

        let module = if module_text.is_empty() {
            Vec::new()
        } else {
            module_text
                .split('.')
                .map(|segment| parse_segment(segment, sign))
                .collect::<Result<Vec<_>>>()?
        };

        // A leading dot marks an anonymous enclosing scope, as in `.main(basic.array)`.
        let path_text = path_text.strip_prefix('.').unwrap_or(path_text);
        let path = path_text
            .split('.')
            .map(|segment| parse_segment(segment, sign))
            .collect::<Result<Vec<_>>>()?;
        if path.is_empty() {
            return Err(InvalidSign(sign.to_string()));
        }

        Ok(Sign {
            module,
            path,
            type_params,
            params,
        })
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_empty() {
            write!(f, "{}::", self.module.join("."))?;
        }
        write!(f, "{}", self.path.join("."))?;
        if !self.type_params.is_empty() {
            write!(f, "[{}]", self.type_params.join(","))?;
        }
        if let Some(params) = &self.params {
            write!(f, "({})", params.join(","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_module_and_member() -> Result<()> {
        let sign = Sign::parse("A::B")?;
        assert_eq!(&["A".to_string()], sign.module());
        assert_eq!(&["B".to_string()], sign.path());
        assert_eq!("B", sign.name());
        assert!(!sign.is_callable());
        assert_eq!("A::B", sign.to_string());
        Ok(())
    }

    #[test]
    fn test_type_path() -> Result<()> {
        let sign = Sign::parse("A::B.C")?;
        assert_eq!(&["B".to_string(), "C".to_string()], sign.path());
        assert_eq!("C", sign.name());
        assert_eq!("A::B.C", sign.to_string());
        Ok(())
    }

    #[test]
    fn test_empty_params() -> Result<()> {
        let sign = Sign::parse("A::B.C()")?;
        assert!(sign.is_callable());
        assert_eq!(Some(&[] as &[String]), sign.params());
        assert_eq!("A::B.C()", sign.to_string());
        Ok(())
    }

    #[test]
    fn test_type_params() -> Result<()> {
        let sign = Sign::parse("A::B.C[T,V]")?;
        assert_eq!(&["T".to_string(), "V".to_string()], sign.type_params());
        assert_eq!("A::B.C[T,V]", sign.to_string());
        Ok(())
    }

    #[test]
    fn test_full_sign() -> Result<()> {
        let sign = Sign::parse("A::B.C[T](A.int,A.str)")?;
        assert_eq!(&["T".to_string()], sign.type_params());
        assert_eq!(
            Some(&["A.int".to_string(), "A.str".to_string()] as &[String]),
            sign.params()
        );
        assert_eq!("A::B.C[T](A.int,A.str)", sign.to_string());
        Ok(())
    }

    #[test]
    fn test_dotted_without_module() -> Result<()> {
        let sign = Sign::parse("A.B")?;
        assert!(sign.module().is_empty());
        assert_eq!(&["A".to_string(), "B".to_string()], sign.path());
        Ok(())
    }

    #[test]
    fn test_leading_dot() -> Result<()> {
        let sign = Sign::parse(".B")?;
        assert!(sign.module().is_empty());
        assert_eq!(&["B".to_string()], sign.path());
        assert_eq!("B", sign.to_string());
        Ok(())
    }

    #[test]
    fn test_leading_dot_with_params() -> Result<()> {
        let sign = Sign::parse(".B(B.int)")?;
        assert_eq!(Some(&["B.int".to_string()] as &[String]), sign.params());
        Ok(())
    }

    #[test]
    fn test_entry_point_sign() -> Result<()> {
        let sign = Sign::parse("hello::<main>(basic.array)")?;
        assert_eq!("<main>", sign.name());
        assert_eq!("hello", sign.module_name());
        Ok(())
    }

    #[test]
    fn test_equality() -> Result<()> {
        assert_eq!(Sign::parse("A::B.C()")?, Sign::parse("A::B.C()")?);
        assert_ne!(Sign::parse("A::B.C()")?, Sign::parse("A::B.C")?);
        assert_ne!(Sign::parse("A::B.C")?, Sign::parse("B::B.C")?);
        Ok(())
    }

    #[test]
    fn test_parameters_match() -> Result<()> {
        let first = Sign::parse("A::f(basic.int)")?;
        let second = Sign::parse("B::g(basic.int)")?;
        let third = Sign::parse("B::g(basic.float)")?;
        assert!(first.parameters_match(&second));
        assert!(!first.parameters_match(&third));
        Ok(())
    }

    #[test]
    fn test_invalid_signs() {
        for sign in ["", "  ", "A..B", "A::", "A::B..C", "A::B.C(", "A::B.C[", "A,B"] {
            assert!(Sign::parse(sign).is_err(), "expected parse failure: {sign}");
        }
    }
}
