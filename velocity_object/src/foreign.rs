use velocity_elp::Sign;

/// The runtime data of a foreign callable: a symbol in a host library the embedding resolves on
/// first call. The VM only stores the coordinates; resolution and invocation live behind the
/// engine's foreign-loader seam.
#[derive(Clone, Debug)]
pub struct Foreign {
    sign: Sign,
    library: String,
    function: String,
}

impl Foreign {
    /// Create a new foreign callable.
    #[must_use]
    pub fn new<L: Into<String>, F: Into<String>>(sign: Sign, library: L, function: F) -> Self {
        Foreign {
            sign,
            library: library.into(),
            function: function.into(),
        }
    }

    /// The callable's signature.
    #[must_use]
    pub fn sign(&self) -> &Sign {
        &self.sign
    }

    /// The library the symbol lives in.
    #[must_use]
    pub fn library(&self) -> &str {
        &self.library
    }

    /// The symbol name.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new() -> velocity_elp::Result<()> {
        let sign = Sign::parse("io::write(basic.string)")?;
        let foreign = Foreign::new(sign.clone(), "libio", "io_write");
        assert_eq!(&sign, foreign.sign());
        assert_eq!("libio", foreign.library());
        assert_eq!("io_write", foreign.function());
        Ok(())
    }
}
