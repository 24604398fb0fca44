use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Role {
    Admin => "admin",
    Doctor => "doctor",
    Receptionist => "receptionist",
    Nurse => "nurse",
    Pharmacist => "pharmacist",
    LabTechnician => "lab_technician",
    Patient => "patient",
});

str_enum!(AppointmentStatus {
    Requested => "requested",
    Confirmed => "confirmed",
    CheckedIn => "checked_in",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
    NoShow => "no_show",
});

str_enum!(AppointmentType {
    FirstVisit => "first_visit",
    FollowUp => "follow_up",
    Consultation => "consultation",
    Emergency => "emergency",
    Telemedicine => "telemedicine",
});

str_enum!(BedStatus {
    VacantClean => "vacant_clean",
    VacantDirty => "vacant_dirty",
    Occupied => "occupied",
});

str_enum!(AdmissionStatus {
    Admitted => "admitted",
    Discharged => "discharged",
});

str_enum!(PrescriptionStatus {
    Pending => "pending",
    RefillRequested => "refill_requested",
    Dispensed => "dispensed",
});

str_enum!(LabPriority {
    Routine => "routine",
    Urgent => "urgent",
    Stat => "stat",
});

// Orders leave PENDING in the lab's own system; the ledger only opens them.
str_enum!(LabOrderStatus {
    Pending => "pending",
});

str_enum!(InvoiceStatus {
    Issued => "issued",
    Partial => "partial",
    Paid => "paid",
});

str_enum!(PaymentMethod {
    Cash => "cash",
    Card => "card",
    MobileMoney => "mobile_money",
    Insurance => "insurance",
    BankTransfer => "bank_transfer",
});

// Only settled payments reach the ledger; gateway-side states stay outside.
str_enum!(PaymentStatus {
    Completed => "completed",
});

impl Role {
    /// Staff bookings are confirmed on creation; self-service ones are requests.
    pub fn confirms_on_booking(self) -> bool {
        matches!(self, Self::Admin | Self::Doctor | Self::Receptionist)
    }

    pub fn is_patient(self) -> bool {
        self == Self::Patient
    }
}

impl AppointmentStatus {
    /// The appointment transition table. Every status change in the crate
    /// goes through this function.
    pub fn can_transition_to(self, next: Self) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Requested, Confirmed)
                | (Requested | Confirmed, CheckedIn)
                | (CheckedIn, InProgress)
                | (InProgress, Completed)
                | (Requested | Confirmed | CheckedIn, Cancelled)
                | (Requested | Confirmed | CheckedIn, NoShow)
        )
    }

    /// Whether `target` can be reached by one or more legal transitions.
    pub fn can_reach(self, target: Self) -> bool {
        let mut frontier = vec![self];
        let mut seen = vec![self];
        while let Some(current) = frontier.pop() {
            for next in Self::ALL {
                if current.can_transition_to(next) && !seen.contains(&next) {
                    if next == target {
                        return true;
                    }
                    seen.push(next);
                    frontier.push(next);
                }
            }
        }
        false
    }

    const ALL: [Self; 7] = [
        Self::Requested,
        Self::Confirmed,
        Self::CheckedIn,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
        Self::NoShow,
    ];
}

impl BedStatus {
    /// Housekeeping may move a bed between the two vacant states only.
    /// OCCUPIED is entered and left exclusively through admit/discharge.
    pub fn can_set_administratively(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::VacantDirty, Self::VacantClean) | (Self::VacantClean, Self::VacantDirty)
        )
    }
}

impl PrescriptionStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::RefillRequested, Self::Dispensed)
                | (Self::Dispensed, Self::RefillRequested)
        )
    }
}
