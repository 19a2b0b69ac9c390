//! Pure qualification checks. `authorize` reads a member snapshot and an
//! aircraft's requirement rows and returns every reason the booking must be
//! denied, in check order. No clock, no locks: the flight date and duty
//! coverage are passed in by the caller.

use time::Date;

use crate::model::{AircraftState, FlightType, MemberSnapshot, Rating};

/// One reason a booking was denied. The `Display` strings are the exact
/// texts returned to members, so tests assert on them verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// No valid record for a required qualification (absent or not signed off).
    MissingQualification { name: String },
    /// Record exists and is signed off but lapsed before the flight date.
    Expired { name: String, expired_on: Date },
    InsufficientTotalTime { required_min: u32, logged_min: u32 },
    InsufficientTimeOnType {
        type_designation: String,
        required_min: u32,
        logged_min: u32,
    },
    MedicalNotCurrent,
    NoInstructorOnDuty,
    NoSoloEndorsement,
    TwoSeatsRequired,
}

fn fmt_minutes(m: u32) -> String {
    if m % 60 == 0 {
        format!("{}h", m / 60)
    } else {
        format!("{}h{:02}m", m / 60, m % 60)
    }
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Denial::MissingQualification { name } => write!(f, "missing {name}"),
            Denial::Expired { name, expired_on } => {
                write!(f, "{name} expired on {expired_on}")
            }
            Denial::InsufficientTotalTime {
                required_min,
                logged_min,
            } => write!(
                f,
                "at least {} total time required ({} logged)",
                fmt_minutes(*required_min),
                fmt_minutes(*logged_min)
            ),
            Denial::InsufficientTimeOnType {
                type_designation,
                required_min,
                logged_min,
            } => write!(
                f,
                "at least {} on type {} required ({} logged)",
                fmt_minutes(*required_min),
                type_designation,
                fmt_minutes(*logged_min)
            ),
            Denial::MedicalNotCurrent => write!(f, "current medical certificate required"),
            Denial::NoInstructorOnDuty => write!(f, "no instructor on duty"),
            Denial::NoSoloEndorsement => write!(f, "solo endorsement required"),
            Denial::TwoSeatsRequired => write!(f, "dual flights require a two-seat aircraft"),
        }
    }
}

fn push_unique(denials: &mut Vec<Denial>, denial: Denial) {
    if !denials.contains(&denial) {
        denials.push(denial);
    }
}

/// Check a member against an aircraft for one flight on one date. Returns
/// every denial found; an empty vec means the booking is authorized.
///
/// Per matching requirement row, the first failing check short-circuits the
/// rest of that row (a missing record is not also reported as lacking hours),
/// but rows never short-circuit each other.
pub fn authorize(
    snapshot: &MemberSnapshot,
    aircraft: &AircraftState,
    flight_type: FlightType,
    date: Date,
    instructor_on_duty: bool,
) -> Vec<Denial> {
    let mut denials = Vec::new();

    if flight_type == FlightType::Dual && aircraft.seats < 2 {
        denials.push(Denial::TwoSeatsRequired);
    }

    let matching: Vec<_> = aircraft
        .requirements
        .iter()
        .filter(|row| row.kind.applies_to(flight_type))
        .collect();

    for row in &matching {
        match snapshot.record_for(&row.qualification_id) {
            None => {
                push_unique(
                    &mut denials,
                    Denial::MissingQualification {
                        name: row.qualification_name.clone(),
                    },
                );
                continue;
            }
            Some(record) if !record.qualified => {
                push_unique(
                    &mut denials,
                    Denial::MissingQualification {
                        name: row.qualification_name.clone(),
                    },
                );
                continue;
            }
            Some(record) => {
                // Expiration overrides the sign-off flag.
                if let Some(expired_on) = record.expires_on
                    && expired_on < date
                {
                    push_unique(
                        &mut denials,
                        Denial::Expired {
                            name: row.qualification_name.clone(),
                            expired_on,
                        },
                    );
                    continue;
                }
            }
        }

        // Hour minimums only apply to members whose hours the club tracks.
        if let Some(ref minutes) = snapshot.flight_minutes {
            if let Some(required) = row.min_minutes_total
                && minutes.total < required
            {
                push_unique(
                    &mut denials,
                    Denial::InsufficientTotalTime {
                        required_min: required,
                        logged_min: minutes.total,
                    },
                );
            }
            if let Some(required) = row.min_minutes_on_type {
                let logged = minutes.on_type(&aircraft.type_designation);
                if logged < required {
                    push_unique(
                        &mut denials,
                        Denial::InsufficientTimeOnType {
                            type_designation: aircraft.type_designation.clone(),
                            required_min: required,
                            logged_min: logged,
                        },
                    );
                }
            }
        }

        if row.requires_medical
            && !snapshot.medical_valid_until.is_some_and(|d| d >= date)
        {
            push_unique(&mut denials, Denial::MedicalNotCurrent);
        }

        if row.requires_instructor && !instructor_on_duty {
            push_unique(&mut denials, Denial::NoInstructorOnDuty);
        }
    }

    // Baseline policy when the aircraft carries no matching rows: students
    // flying solo still need an endorsement on some current record.
    if matching.is_empty()
        && snapshot.rating == Rating::Student
        && flight_type == FlightType::Solo
        && !snapshot
            .records
            .iter()
            .any(|r| r.solo_endorsement && r.valid_on(date))
    {
        push_unique(&mut denials, Denial::NoSoloEndorsement);
    }

    // Students never fly solo without an instructor on the field, no matter
    // what the aircraft's rows say.
    if snapshot.rating == Rating::Student
        && flight_type == FlightType::Solo
        && !instructor_on_duty
    {
        push_unique(&mut denials, Denial::NoInstructorOnDuty);
    }

    denials
}
