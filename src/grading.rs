use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;

/// One cell of the marks matrix: a student either sat the paper and scored
/// an integer in 0..=100, or was absent. Absence is not a zero; it stays
/// out of every total, mean and grade count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkState {
    Absent,
    Scored(u32),
}

/// 1-decimal display rounding used by the dashboard tables:
/// `floor(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Report-card grade scheme (numeric thresholds over a mark or a mean).
///
/// This is one of two grading policies in the system; the other is the
/// letter/points scale below. They are separate on purpose and must not be
/// merged: report cards grade through these thresholds, while subject and
/// centre statistics read back whatever letter a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportGrade {
    A,
    B,
    C,
    D,
    F,
}

impl ReportGrade {
    pub fn letter(self) -> &'static str {
        match self {
            ReportGrade::A => "A",
            ReportGrade::B => "B",
            ReportGrade::C => "C",
            ReportGrade::D => "D",
            ReportGrade::F => "F",
        }
    }

    /// Canonical report-card remark, one phrase per letter.
    pub fn comment(self) -> &'static str {
        match self {
            ReportGrade::A => "Excellent",
            ReportGrade::B => "Very Good",
            ReportGrade::C => "Good",
            ReportGrade::D => "Satisfactory",
            ReportGrade::F => "Fail",
        }
    }
}

/// Total over [0, 100]; callers validate the range before grading.
pub fn grade_from_mark(mark: f64) -> ReportGrade {
    if mark >= 75.0 {
        ReportGrade::A
    } else if mark >= 65.0 {
        ReportGrade::B
    } else if mark >= 45.0 {
        ReportGrade::C
    } else if mark >= 30.0 {
        ReportGrade::D
    } else {
        ReportGrade::F
    }
}

/// NECTA-style division banding of a student's mean score. Each division
/// carries a fixed points value; IV doubles as the no-data fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Division {
    I,
    II,
    III,
    IV,
}

impl Division {
    pub fn numeral(self) -> &'static str {
        match self {
            Division::I => "I",
            Division::II => "II",
            Division::III => "III",
            Division::IV => "IV",
        }
    }

    pub fn points(self) -> u32 {
        match self {
            Division::I => 7,
            Division::II => 9,
            Division::III => 12,
            Division::IV => 0,
        }
    }
}

pub fn division_from_mean(mean: f64) -> Division {
    if mean >= 75.0 {
        Division::I
    } else if mean >= 65.0 {
        Division::II
    } else if mean >= 45.0 {
        Division::III
    } else {
        Division::IV
    }
}

/// Letter/points scale used by subject and centre statistics: A..F map to
/// 1..6, lower is better. Anything unrecognized is ungraded, excluded from
/// GPA on both sides of the division, and never counted as a failure.
pub fn points_for_letter(grade: &str) -> Option<u8> {
    match grade.trim().to_ascii_uppercase().as_str() {
        "A" => Some(1),
        "B" => Some(2),
        "C" => Some(3),
        "D" => Some(4),
        "E" => Some(5),
        "F" => Some(6),
        _ => None,
    }
}

/// Cohort competency label from a GPA on the 1..6 points scale. Bands are
/// inclusive on their upper bound and cover (0, inf).
pub fn competency_level(gpa: Option<f64>) -> &'static str {
    let Some(g) = gpa else {
        return "-";
    };
    if !g.is_finite() {
        return "-";
    }
    if g <= 2.0 {
        "Very Good"
    } else if g <= 3.0 {
        "Good"
    } else if g <= 4.0 {
        "Satisfactory"
    } else if g <= 5.0 {
        "Unsatisfactory"
    } else {
        "Poor"
    }
}

pub fn gpa_display(gpa: Option<f64>) -> String {
    match gpa {
        Some(g) if g.is_finite() => format!("{:.2}", g),
        _ => "-".to_string(),
    }
}

pub fn mean_display(mean: Option<f64>) -> String {
    match mean {
        Some(m) if m.is_finite() => format!("{:.1}", round_off_1_decimal(m)),
        _ => "-".to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    pub count: usize,
    pub total: u32,
    pub mean: Option<f64>,
    pub grade: Option<ReportGrade>,
    pub division: Division,
    pub points: u32,
}

/// Fold one student's marks for one exam. `count` is the number of papers
/// actually sat; with nothing sat the mean stays `None` (never NaN) and the
/// division falls back to IV with 0 points.
pub fn aggregate_student<I>(marks: I) -> StudentAggregate
where
    I: IntoIterator<Item = MarkState>,
{
    let mut count: usize = 0;
    let mut total: u32 = 0;

    for m in marks {
        match m {
            MarkState::Absent => {}
            MarkState::Scored(v) => {
                count += 1;
                total += v;
            }
        }
    }

    let mean = if count > 0 {
        Some(total as f64 / count as f64)
    } else {
        None
    };
    let grade = mean.map(grade_from_mark);
    let division = mean.map(division_from_mean).unwrap_or(Division::IV);

    StudentAggregate {
        count,
        total,
        mean,
        grade,
        division,
        points: division.points(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub student_id: String,
    pub total: u32,
    pub position: usize,
}

/// Positions 1..=n by total marks, descending. The sort is stable, so equal
/// totals keep their roster order. Rank is by total only; it is computed
/// independently of the mean-derived grade and the two may disagree.
pub fn rank_students(rows: &[(String, u32)]) -> Vec<RankEntry> {
    let mut order: Vec<(usize, &(String, u32))> = rows.iter().enumerate().collect();
    order.sort_by(|a, b| b.1 .1.cmp(&a.1 .1));
    order
        .into_iter()
        .enumerate()
        .map(|(i, (_, (student_id, total)))| RankEntry {
            student_id: student_id.clone(),
            total: *total,
            position: i + 1,
        })
        .collect()
}

/// What one report record says about one subject entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectOutcome {
    /// Marked absent: registered but did not sit.
    Absent,
    /// Sat, with a recorded grade letter (which may or may not be on the
    /// points scale; off-scale letters count as sat but ungraded).
    Graded(String),
    /// Sat with no grade recorded.
    Sat,
}

/// Sort key pushing ungraded subjects to the bottom of the ranking. Ordering
/// only: a subject with no graded entries still displays "-", never 99.
pub const UNGRADED_SORT_GPA: f64 = 99.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub code: String,
    pub registered: usize,
    pub sat: usize,
    pub absent: usize,
    pub grade_counts: BTreeMap<String, usize>,
    pub gpa: Option<f64>,
}

fn empty_grade_counts() -> BTreeMap<String, usize> {
    ["A", "B", "C", "D", "E", "F"]
        .iter()
        .map(|l| (l.to_string(), 0))
        .collect()
}

/// Accumulate per-subject statistics from flattened breakdown entries and
/// rank the subjects ascending by GPA (lower points = better performance).
/// First appearance fixes the accumulation order, so ties and the ungraded
/// tail stay deterministic.
pub fn subject_statistics<I>(entries: I) -> Vec<SubjectStats>
where
    I: IntoIterator<Item = (String, SubjectOutcome)>,
{
    let mut stats: Vec<SubjectStats> = Vec::new();
    let mut points_sums: Vec<(u64, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (code, outcome) in entries {
        let i = match index.get(&code) {
            Some(&i) => i,
            None => {
                index.insert(code.clone(), stats.len());
                stats.push(SubjectStats {
                    code,
                    registered: 0,
                    sat: 0,
                    absent: 0,
                    grade_counts: empty_grade_counts(),
                    gpa: None,
                });
                points_sums.push((0, 0));
                stats.len() - 1
            }
        };

        stats[i].registered += 1;
        match outcome {
            SubjectOutcome::Absent => stats[i].absent += 1,
            SubjectOutcome::Sat => stats[i].sat += 1,
            SubjectOutcome::Graded(letter) => {
                stats[i].sat += 1;
                if let Some(p) = points_for_letter(&letter) {
                    let key = letter.trim().to_ascii_uppercase();
                    *stats[i].grade_counts.entry(key).or_insert(0) += 1;
                    points_sums[i].0 += p as u64;
                    points_sums[i].1 += 1;
                }
            }
        }
    }

    for (i, (sum, n)) in points_sums.iter().enumerate() {
        if *n > 0 {
            stats[i].gpa = Some(*sum as f64 / *n as f64);
        }
    }

    stats.sort_by(|a, b| {
        let ka = a.gpa.unwrap_or(UNGRADED_SORT_GPA);
        let kb = b.gpa.unwrap_or(UNGRADED_SORT_GPA);
        ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
    });
    stats
}

pub fn subject_badge(gpa: Option<f64>) -> &'static str {
    match gpa {
        None => "-",
        Some(g) if !g.is_finite() => "-",
        Some(g) if g <= 3.0 => "Good",
        Some(g) if g <= 4.0 => "Average",
        _ => "Weak",
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CentreSummary {
    pub total: usize,
    pub passed: usize,
    pub percent: Option<f64>,
    pub gpa: Option<f64>,
    pub level: &'static str,
}

impl CentreSummary {
    pub fn percent_display(&self) -> String {
        match self.percent {
            Some(p) => format!("{:.1}%", p),
            None => "-".to_string(),
        }
    }
}

/// Whole-cohort pass rate and GPA over one exam's report records. A record
/// passes when it carries a grade other than "F"; GPA averages only letters
/// on the points scale.
pub fn centre_summary<I, S>(grades: I) -> CentreSummary
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    let mut total: usize = 0;
    let mut passed: usize = 0;
    let mut points_sum: u64 = 0;
    let mut graded: usize = 0;

    for grade in grades {
        total += 1;
        let Some(grade) = grade else {
            continue;
        };
        let letter = grade.as_ref().trim().to_ascii_uppercase();
        if letter.is_empty() {
            continue;
        }
        if letter != "F" {
            passed += 1;
        }
        if let Some(p) = points_for_letter(&letter) {
            points_sum += p as u64;
            graded += 1;
        }
    }

    let percent = if total > 0 {
        Some(round_off_1_decimal(100.0 * passed as f64 / total as f64))
    } else {
        None
    };
    let gpa = if graded > 0 {
        Some(points_sum as f64 / graded as f64)
    } else {
        None
    };

    CentreSummary {
        total,
        passed,
        percent,
        gpa,
        level: competency_level(gpa),
    }
}
