//! Closed vocabularies stored as strings in the database.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Alumni,
    Faculty,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Alumni => "alumni",
            Role::Faculty => "faculty",
        }
    }

    /// Alumni and faculty publish opportunities.
    pub fn can_post(&self) -> bool {
        match self {
            Role::Alumni | Role::Faculty => true,
            Role::Student => false,
        }
    }

    pub fn can_apply(&self) -> bool {
        match self {
            Role::Student => true,
            Role::Alumni | Role::Faculty => false,
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "alumni" => Ok(Role::Alumni),
            "faculty" => Ok(Role::Faculty),
            _ => Err(AppError::param_error("role must be one of student, alumni, faculty")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpportunityKind {
    #[serde(rename = "internship")]
    Internship,
    #[serde(rename = "full-time")]
    FullTime,
    #[serde(rename = "research")]
    Research,
    #[serde(rename = "part-time")]
    PartTime,
}

impl OpportunityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityKind::Internship => "internship",
            OpportunityKind::FullTime => "full-time",
            OpportunityKind::Research => "research",
            OpportunityKind::PartTime => "part-time",
        }
    }
}

impl FromStr for OpportunityKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "internship" => Ok(OpportunityKind::Internship),
            "full-time" | "fulltime" | "job" => Ok(OpportunityKind::FullTime),
            "research" => Ok(OpportunityKind::Research),
            "part-time" | "parttime" => Ok(OpportunityKind::PartTime),
            _ => Err(AppError::param_error(
                "type must be one of internship, full-time, research, part-time",
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    /// Parses a status a poster may set. `pending` is the initial state only.
    pub fn parse_decision(s: &str) -> Result<Self, AppError> {
        match s.parse::<ApplicationStatus>()? {
            ApplicationStatus::Pending => Err(AppError::param_error(
                "status must be accepted or rejected",
            )),
            decided => Ok(decided),
        }
    }
}

impl FromStr for ApplicationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ApplicationStatus::Pending),
            "accepted" => Ok(ApplicationStatus::Accepted),
            "rejected" => Ok(ApplicationStatus::Rejected),
            _ => Err(AppError::param_error("status must be accepted or rejected")),
        }
    }
}

/// Form fields the client may send either as JSON numbers or as strings.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum NumberOrText {
    Number(f64),
    Text(String),
}

impl NumberOrText {
    /// `None` for blank text. Out-of-range or unparsable values are rejected.
    pub fn to_metric(&self, field: &str, max: f64) -> Result<Option<f64>, AppError> {
        let value = match self {
            NumberOrText::Number(n) => *n,
            NumberOrText::Text(s) if s.trim().is_empty() => return Ok(None),
            NumberOrText::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| AppError::param_error(format!("{} must be a number", field)))?,
        };
        if !value.is_finite() || value < 0.0 || value > max {
            return Err(AppError::param_error(format!(
                "{} must be between 0 and {}",
                field, max
            )));
        }
        Ok(Some(value))
    }

    pub fn into_text(self) -> String {
        match self {
            NumberOrText::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", n as i64),
            NumberOrText::Number(n) => n.to_string(),
            NumberOrText::Text(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("student", Role::Student)]
    #[case(" Alumni ", Role::Alumni)]
    #[case("FACULTY", Role::Faculty)]
    fn parses_roles(#[case] raw: &str, #[case] expected: Role) {
        assert_eq!(raw.parse::<Role>().ok(), Some(expected));
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn only_alumni_and_faculty_post() {
        assert!(!Role::Student.can_post());
        assert!(Role::Alumni.can_post());
        assert!(Role::Faculty.can_post());
        assert!(Role::Student.can_apply());
        assert!(!Role::Faculty.can_apply());
    }

    #[test]
    fn kind_serializes_with_hyphen() {
        let json = serde_json::to_string(&OpportunityKind::FullTime).unwrap();
        assert_eq!(json, "\"full-time\"");
        assert_eq!("part_time".parse::<OpportunityKind>().ok(), Some(OpportunityKind::PartTime));
    }

    #[test]
    fn pending_is_not_a_decision() {
        assert!(ApplicationStatus::parse_decision("pending").is_err());
        assert!(ApplicationStatus::parse_decision("withdrawn").is_err());
        assert_eq!(
            ApplicationStatus::parse_decision("Accepted").ok(),
            Some(ApplicationStatus::Accepted)
        );
    }

    #[rstest]
    #[case(NumberOrText::Number(8.5), Some(8.5))]
    #[case(NumberOrText::Text(" 9.1 ".into()), Some(9.1))]
    #[case(NumberOrText::Text("".into()), None)]
    fn metrics_accept_numbers_and_strings(#[case] input: NumberOrText, #[case] expected: Option<f64>) {
        assert_eq!(input.to_metric("cgpa", 10.0).ok(), Some(expected));
    }

    #[test]
    fn metrics_reject_out_of_range() {
        assert!(NumberOrText::Number(10.5).to_metric("cgpa", 10.0).is_err());
        assert!(NumberOrText::Text("abc".into()).to_metric("cgpa", 10.0).is_err());
        assert!(NumberOrText::Number(-1.0).to_metric("tenth_percentage", 100.0).is_err());
    }

    #[test]
    fn salary_numbers_render_without_fraction() {
        assert_eq!(NumberOrText::Number(50000.0).into_text(), "50000");
        assert_eq!(NumberOrText::Text("10-12 LPA".into()).into_text(), "10-12 LPA");
    }
}
