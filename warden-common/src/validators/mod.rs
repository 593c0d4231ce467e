pub const MIN_PASSWORD_LENGTH: usize = 12;
pub const MAX_PASSWORD_LENGTH: usize = 72;

#[derive(Debug)]
pub enum Validity {
    Valid,
    Invalid(String),
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        match &self {
            Validity::Valid => true,
            Validity::Invalid(_) => false,
        }
    }
}

pub fn validate_email_address(email: &str) -> Validity {
    if email.chars().count() > 320 {
        return Validity::Invalid(String::from("Email address is too long."));
    }

    for c in email.chars() {
        if c == ' ' || !c.is_ascii() {
            return Validity::Invalid(String::from(
                "Email address cannot contain a space or non-ASCII characters.",
            ));
        }
    }

    if email.contains("@.") {
        return Validity::Invalid(String::from(
            "Domain name in email address cannot begin with a period.",
        ));
    }

    let email = match email.split_once('@') {
        Some(s) => s,
        None => {
            return Validity::Invalid(String::from("Email address must contain an at symbol (@)."))
        }
    };

    if email.0.is_empty() || email.1.len() < 3 {
        return Validity::Invalid(String::from("Email username or domain name is too short."));
    }

    if email.1.contains('@') || !email.1.contains('.') {
        return Validity::Invalid(String::from(
            "Email address must have only one at symbol (@) and the domain must contain a period.",
        ));
    }

    if email.1.ends_with('.') {
        return Validity::Invalid(String::from("Email address cannot end with a period."));
    }

    Validity::Valid
}

pub fn validate_new_password(password: &str) -> Validity {
    let char_count = password.chars().count();

    if char_count < MIN_PASSWORD_LENGTH {
        return Validity::Invalid(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters long."
        ));
    }

    if char_count > MAX_PASSWORD_LENGTH {
        return Validity::Invalid(format!(
            "Password cannot be longer than {MAX_PASSWORD_LENGTH} characters."
        ));
    }

    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Validity::Invalid(String::from(
            "Password must contain an uppercase letter.",
        ));
    }

    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Validity::Invalid(String::from(
            "Password must contain a lowercase letter.",
        ));
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Validity::Invalid(String::from("Password must contain a number."));
    }

    if !password
        .chars()
        .any(|c| c.is_ascii_punctuation() || (!c.is_ascii_alphanumeric() && !c.is_whitespace()))
    {
        return Validity::Invalid(String::from("Password must contain a symbol."));
    }

    Validity::Valid
}

/// Masks an email address for display on the verification page, e.g.
/// `jdoe@example.com` becomes `j***@example.com`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((name, domain)) => {
            let first = name.chars().next().unwrap_or('*');
            format!("{first}***@{domain}")
        }
        None => String::from("***"),
    }
}
