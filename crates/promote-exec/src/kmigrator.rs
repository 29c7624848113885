//! Argument contract of the migration utility.

use promote_core::{CompiledFlags, Credentials, EntityRef, I18nMode, RefdataMode};

/// Script locations and how to launch them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tools {
    pub extract_script: String,
    pub import_script: String,
    pub interpreter: Option<String>,
}

impl Tools {
    /// Program and leading arguments for a script.
    pub fn launcher(&self, script: &str) -> Vec<String> {
        match &self.interpreter {
            Some(interpreter) => vec![interpreter.clone(), script.to_string()],
            None => vec![script.to_string()],
        }
    }
}

pub fn extract_args(credentials: &Credentials, url: &str, entity: &EntityRef, filename: &str) -> Vec<String> {
    let mut args = login_args(credentials, url);
    args.extend(["-action".into(), "Bundle".into()]);
    args.extend(["-entityId".into(), entity.entity_id.to_string()]);
    if let Some(code) = &entity.reference_code {
        args.extend(["-referenceCode".into(), code.clone()]);
    }
    args.extend(["-filename".into(), filename.to_string()]);
    args
}

pub fn import_args(
    credentials: &Credentials,
    url: &str,
    filename: &str,
    flags: &CompiledFlags,
    i18n: I18nMode,
    refdata: RefdataMode,
) -> Vec<String> {
    let mut args = login_args(credentials, url);
    args.extend(["-action".into(), "import".into()]);
    args.extend(["-filename".into(), filename.to_string()]);
    args.extend(["-i18n".into(), i18n.as_arg().into()]);
    args.extend(["-refdata".into(), refdata.as_arg().into()]);
    args.extend(["-flags".into(), flags.as_str().into()]);
    args
}

fn login_args(credentials: &Credentials, url: &str) -> Vec<String> {
    vec![
        "-username".into(),
        credentials.username.clone(),
        "-password".into(),
        credentials.password().to_string(),
        "-url".into(),
        url.to_string(),
    ]
}

/// Arguments with the password value masked, for logging.
pub fn redacted(args: &[String]) -> String {
    let mut out = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            out.push("****".to_string());
            mask_next = false;
        } else {
            mask_next = arg == "-password";
            out.push(arg.clone());
        }
    }
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("admin", "s3cret")
    }

    #[test]
    fn extract_without_reference_code() {
        let args = extract_args(&creds(), "https://ppm", &EntityRef::whole_type(9), "out.xml");
        assert!(!args.contains(&"-referenceCode".to_string()));
        assert_eq!(
            args[6..],
            ["-action", "Bundle", "-entityId", "9", "-filename", "out.xml"]
        );
    }

    #[test]
    fn extract_with_reference_code() {
        let args = extract_args(&creds(), "https://ppm", &EntityRef::new(9, "WF_A"), "out.xml");
        let pos = args.iter().position(|a| a == "-referenceCode").unwrap();
        assert_eq!(args[pos + 1], "WF_A");
    }

    #[test]
    fn import_carries_flags_and_modes() {
        let flags = CompiledFlags::parse("NNNNYNNNNNNNNNNNNNNNNNNNN").unwrap();
        let args = import_args(
            &creds(),
            "https://ppm",
            "in.xml",
            &flags,
            I18nMode::LenientCharset,
            RefdataMode::NoChange,
        );
        let joined = args.join(" ");
        assert!(joined.contains("-action import"));
        assert!(joined.contains("-i18n charset"));
        assert!(joined.contains("-refdata nochange"));
        assert!(joined.ends_with("-flags NNNNYNNNNNNNNNNNNNNNNNNNN"));
    }

    #[test]
    fn redaction_masks_password() {
        let args = extract_args(&creds(), "https://ppm", &EntityRef::whole_type(9), "out.xml");
        let line = redacted(&args);
        assert!(!line.contains("s3cret"));
        assert!(line.contains("-password ****"));
    }

    #[test]
    fn launcher_with_interpreter() {
        let tools = Tools {
            extract_script: "x.sh".into(),
            import_script: "i.sh".into(),
            interpreter: Some("bash".into()),
        };
        assert_eq!(tools.launcher("x.sh"), vec!["bash", "x.sh"]);
    }
}
