use serde::Serialize;
use std::cmp::Ordering;

use crate::model::Student;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    PointsDesc,
    PointsAsc,
    NameAsc,
    NameDesc,
}

impl SortKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "points-desc" => Some(Self::PointsDesc),
            "points-asc" => Some(Self::PointsAsc),
            "name-asc" => Some(Self::NameAsc),
            "name-desc" => Some(Self::NameDesc),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PointsDesc => "points-desc",
            Self::PointsAsc => "points-asc",
            Self::NameAsc => "name-asc",
            Self::NameDesc => "name-desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Standing {
    Excellent,
    Normal,
    Warning,
    AtRisk,
}

impl Standing {
    pub fn for_points(points: i64) -> Self {
        if points >= 85 {
            Self::Excellent
        } else if points < 50 {
            Self::AtRisk
        } else if points < 70 {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry<'a> {
    #[serde(flatten)]
    pub student: &'a Student,
    pub standing: Standing,
}

/// Filters by case-insensitive name substring, then orders by `sort`.
/// The sort is stable, so equal keys keep roster order.
pub fn view<'a>(roster: &'a [Student], search: &str, sort: SortKey) -> Vec<RosterEntry<'a>> {
    let needle = search.trim().to_lowercase();
    let mut out: Vec<&Student> = roster
        .iter()
        .filter(|s| needle.is_empty() || s.name.to_lowercase().contains(&needle))
        .collect();

    out.sort_by(|a, b| match sort {
        SortKey::PointsDesc => b.points.cmp(&a.points),
        SortKey::PointsAsc => a.points.cmp(&b.points),
        SortKey::NameAsc => compare_names(&a.name, &b.name),
        SortKey::NameDesc => compare_names(&b.name, &a.name),
    });

    out.into_iter()
        .map(|student| RosterEntry {
            student,
            standing: Standing::for_points(student.points),
        })
        .collect()
}

/// Locale-aware name comparison: accents and case only break ties.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let primary = a
        .chars()
        .flat_map(collation_key)
        .cmp(b.chars().flat_map(collation_key));
    primary
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| a.cmp(b))
}

fn collation_key(c: char) -> std::char::ToLowercase {
    fold_accent(c).to_lowercase()
}

fn fold_accent(c: char) -> char {
    match c {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'Ç' => 'C',
        'ç' => 'c',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'Ñ' => 'N',
        'ñ' => 'n',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => 'O',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'Ý' => 'Y',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}
