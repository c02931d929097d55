//! Entity generators seed a store with its initial content.

use crate::profile::{
    number_value, round_to, timestamp_value, MutationProfile, NumericField, NumericGroup,
    ScheduleRule, StatusRule,
};
use crate::projection::Projection;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use vitalsync_protocol::EntityMap;

/// Collection holding patients.
pub const PATIENTS: &str = "patients";

/// Collection holding equipment attached to patients.
pub const EQUIPMENT: &str = "equipment";

/// Produces initial entity content and describes how it changes.
///
/// The store treats generated entities as opaque value trees; only the
/// mutation profiles and the projection name concrete fields.
pub trait EntityGenerator: Send + Sync {
    /// Label carried by every snapshot.
    fn label(&self) -> &str;

    /// Builds every collection from scratch.
    fn populate(&self, rng: &mut StdRng, now: DateTime<Utc>) -> BTreeMap<String, EntityMap>;

    /// Mutation profiles, in the order passes visit collections.
    fn profiles(&self) -> Vec<MutationProfile>;

    /// Volatile subset used for realtime snapshots.
    fn projection(&self) -> Projection;
}

const STATUSES: &[(&str, f64)] = &[
    ("stable", 0.6),
    ("critical", 0.1),
    ("recovering", 0.2),
    ("observation", 0.1),
];

const BLOOD_TYPES: &[(&str, f64)] = &[
    ("A+", 0.28),
    ("A-", 0.06),
    ("B+", 0.20),
    ("B-", 0.05),
    ("AB+", 0.05),
    ("AB-", 0.01),
    ("O+", 0.32),
    ("O-", 0.03),
];

const DRUGS: &[&str] = &[
    "Morphine",
    "Midazolam",
    "Propofol",
    "Fentanyl",
    "Norepinephrine",
    "Dopamine",
    "Furosemide",
    "Heparin",
    "Insulin",
    "Vancomycin",
    "Piperacillin",
    "Metoprolol",
    "Omeprazole",
    "Acetaminophen",
    "Aspirin",
    "Amlodipine",
];

const ROUTES: &[&str] = &["IV", "PO", "SQ"];

const ALLERGENS: &[&str] = &["Penicillin", "Sulfa", "Latex", "Shellfish", "Contrast dye", "Codeine"];

const SEVERITIES: &[&str] = &["mild", "moderate", "severe", "life-threatening"];

const DIAGNOSES: &[&str] = &[
    "Acute myocardial infarction",
    "Sepsis",
    "Pneumonia",
    "Heart failure",
    "Acute kidney injury",
    "Stroke",
    "Respiratory failure",
    "Trauma",
    "Diabetic ketoacidosis",
];

const EQUIPMENT_TYPES: &[&str] = &["ventilator", "monitor", "pump", "dialysis", "defibrillator"];

/// Intensive-care ward: patients with vitals and medications, and one piece
/// of equipment attached to each patient.
#[derive(Debug, Clone)]
pub struct WardGenerator {
    label: String,
    patients: usize,
}

impl Default for WardGenerator {
    fn default() -> Self {
        Self {
            label: "ICU-A".to_owned(),
            patients: 30,
        }
    }
}

impl WardGenerator {
    /// Creates a ward with `patients` patients and as many devices.
    pub fn new(label: impl Into<String>, patients: usize) -> Self {
        Self {
            label: label.into(),
            patients,
        }
    }

    /// Identifier of the `n`-th patient (1-based).
    pub fn patient_id(n: usize) -> String {
        format!("P{n:03}")
    }

    /// Identifier of the `n`-th device (1-based).
    pub fn equipment_id(n: usize) -> String {
        format!("EQ{n:03}")
    }

    fn patient(&self, rng: &mut StdRng, n: usize, now: DateTime<Utc>) -> Value {
        let height = in_range(rng, 150.0, 190.0);
        let weight = in_range(rng, 45.0, 120.0);
        let systolic = in_range(rng, 90.0, 140.0);
        let diastolic = in_range(rng, 60.0, 90.0);
        let (eye, verbal, motor) = (rng.gen_range(1..=4), rng.gen_range(1..=5), rng.gen_range(1..=6));

        let medications: Vec<Value> = (0..rng.gen_range(3..=8))
            .map(|_| medication(rng, now))
            .collect();
        let allergies: Vec<Value> = (0..rng.gen_range(0..=3))
            .map(|_| {
                json!({
                    "id": random_uuid(rng),
                    "allergen": choose(rng, ALLERGENS),
                    "severity": choose(rng, SEVERITIES),
                })
            })
            .collect();
        let diagnoses: Vec<Value> = (0..rng.gen_range(1..=3))
            .map(|i| {
                json!({
                    "id": random_uuid(rng),
                    "description": choose(rng, DIAGNOSES),
                    "type": if i == 0 { "primary" } else { "secondary" },
                    "status": if rng.gen_bool(0.8) { "active" } else { "resolved" },
                })
            })
            .collect();

        let vitals = json!({
            "heartRate": number_value(in_range(rng, 60.0, 100.0)),
            "bloodPressure": {
                "systolic": number_value(systolic),
                "diastolic": number_value(diastolic),
                "meanArterialPressure": number_value(((systolic + 2.0 * diastolic) / 3.0).round()),
            },
            "spo2": number_value(in_range(rng, 95.0, 100.0)),
            "temperature": number_value(in_range(rng, 36.0, 37.5)),
            "respiratoryRate": number_value(in_range(rng, 12.0, 20.0)),
            "centralVenousPressure": number_value(in_range(rng, 2.0, 8.0)),
            "cardiacOutput": number_value(in_range(rng, 4.0, 8.0)),
            "bloodGlucose": number_value(in_range(rng, 70.0, 200.0)),
            "painScore": rng.gen_range(0..=10),
            "glasgowComaScale": {
                "eye": eye,
                "verbal": verbal,
                "motor": motor,
                "total": eye + verbal + motor,
            },
        });
        let blood_work = json!({
            "hemoglobin": number_value(in_range(rng, 12.0, 17.0)),
            "whiteBloodCells": number_value(in_range(rng, 4.0, 11.0)),
            "platelets": number_value(in_range(rng, 150.0, 450.0)),
            "sodium": number_value(in_range(rng, 135.0, 145.0)),
            "potassium": number_value(in_range(rng, 3.5, 5.0)),
            "creatinine": number_value(in_range(rng, 0.6, 1.3)),
        });
        let blood_gas = json!({
            "ph": number_value(in_range(rng, 7.35, 7.45)),
            "pco2": number_value(in_range(rng, 35.0, 45.0)),
            "po2": number_value(in_range(rng, 80.0, 100.0)),
            "lactate": number_value(in_range(rng, 0.5, 2.2)),
        });
        let lab_updated = now - Duration::minutes(rng.gen_range(0..360));

        json!({
            "name": format!("Patient {n}"),
            "age": rng.gen_range(20..80),
            "gender": if rng.gen_bool(0.5) { "M" } else { "F" },
            "height": number_value(height),
            "weight": number_value(weight),
            "bmi": number_value(round_to(weight / ((height / 100.0) * (height / 100.0)), 1)),
            "bloodType": weighted(rng, BLOOD_TYPES),
            "vitals": vitals,
            "medications": medications,
            "labResults": {
                "bloodWork": blood_work,
                "arterialBloodGas": blood_gas,
                "lastUpdated": timestamp_value(lab_updated),
            },
            "allergies": allergies,
            "diagnoses": diagnoses,
            "status": weighted(rng, STATUSES),
            "room": format!("{}{}", rng.gen_range(1..=10), char::from(b'A' + rng.gen_range(0..6u8))),
            "admissionDate": timestamp_value(now - Duration::hours(rng.gen_range(1..720))),
        })
    }

    fn equipment(&self, rng: &mut StdRng, patient: &str, now: DateTime<Utc>) -> Value {
        json!({
            "type": choose(rng, EQUIPMENT_TYPES),
            "status": if rng.gen_bool(0.9) { "active" } else { "maintenance" },
            "patient": patient,
            "lastMaintenance": timestamp_value(now - Duration::hours(rng.gen_range(1..168))),
            "batteryLevel": rng.gen_range(0..100),
        })
    }
}

impl EntityGenerator for WardGenerator {
    fn label(&self) -> &str {
        &self.label
    }

    fn populate(&self, rng: &mut StdRng, now: DateTime<Utc>) -> BTreeMap<String, EntityMap> {
        let mut patients = EntityMap::new();
        let mut equipment = EntityMap::new();
        for n in 1..=self.patients {
            let patient_id = Self::patient_id(n);
            let device = self.equipment(rng, &patient_id, now);
            patients.insert(patient_id.clone(), self.patient(rng, n, now));
            equipment.insert(Self::equipment_id(n), device);
        }
        BTreeMap::from([
            (PATIENTS.to_owned(), patients),
            (EQUIPMENT.to_owned(), equipment),
        ])
    }

    fn profiles(&self) -> Vec<MutationProfile> {
        let patients = MutationProfile::new(PATIENTS)
            .with_group(NumericGroup::single(
                0.7,
                NumericField::new("vitals.heartRate", 60.0, 100.0, 5.0),
            ))
            .with_group(NumericGroup::single(
                0.5,
                NumericField::new("vitals.spo2", 95.0, 100.0, 2.0),
            ))
            .with_group(NumericGroup::single(
                0.3,
                NumericField::new("vitals.temperature", 36.0, 37.5, 0.3),
            ))
            .with_group(NumericGroup::single(
                0.4,
                NumericField::new("vitals.respiratoryRate", 12.0, 20.0, 2.0),
            ))
            .with_group(NumericGroup::linked(
                0.6,
                vec![
                    NumericField::new("vitals.bloodPressure.systolic", 90.0, 140.0, 5.0),
                    NumericField::new("vitals.bloodPressure.diastolic", 60.0, 90.0, 3.0),
                ],
            ))
            .with_schedule(ScheduleRule {
                array: "medications".into(),
                entity_probability: 0.3,
                item_probability: 0.5,
                stamp_field: "lastGiven".into(),
                due_field: "nextDue".into(),
                min_due: Duration::hours(4),
                max_due: Duration::hours(10),
            })
            .with_status(StatusRule::new("status", 0.05, STATUSES));

        let equipment = MutationProfile::new(EQUIPMENT).with_status(
            StatusRule::new("status", 0.1, &[("active", 0.8), ("maintenance", 0.2)])
                .with_companion(NumericField::new("batteryLevel", 0.0, 100.0, 10.0)),
        );

        vec![patients, equipment]
    }

    fn projection(&self) -> Projection {
        Projection::new()
            .with_collection(
                PATIENTS,
                &[
                    "status",
                    "vitals",
                    "medications.*.id",
                    "medications.*.name",
                    "medications.*.dosage",
                    "medications.*.lastGiven",
                    "medications.*.nextDue",
                ],
            )
            .with_collection(EQUIPMENT, &["type", "status", "patient", "batteryLevel"])
    }
}

fn medication(rng: &mut StdRng, now: DateTime<Utc>) -> Value {
    let unit = if rng.gen_bool(0.5) { "mg" } else { "mcg" };
    json!({
        "id": random_uuid(rng),
        "name": choose(rng, DRUGS),
        "dosage": format!("{}{unit}", rng.gen_range(5..205)),
        "route": choose(rng, ROUTES),
        "frequency": format!("{}x/day", rng.gen_range(1..=4)),
        "lastGiven": timestamp_value(now - Duration::minutes(rng.gen_range(0..120))),
        "nextDue": timestamp_value(now + Duration::minutes(rng.gen_range(0..120))),
        "prescribedBy": format!("Dr. {}", char::from(b'A' + rng.gen_range(0..26u8))),
    })
}

fn in_range(rng: &mut StdRng, min: f64, max: f64) -> f64 {
    round_to(rng.gen_range(min..=max), 1)
}

fn choose(rng: &mut StdRng, items: &[&'static str]) -> &'static str {
    items.choose(rng).copied().unwrap_or_default()
}

fn weighted(rng: &mut StdRng, items: &[(&'static str, f64)]) -> &'static str {
    items
        .choose_weighted(rng, |(_, weight)| *weight)
        .map(|(value, _)| *value)
        .unwrap_or_default()
}

fn random_uuid(rng: &mut StdRng) -> String {
    uuid::Builder::from_random_bytes(rng.gen()).into_uuid().to_string()
}
