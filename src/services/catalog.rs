//! Diagnosis text and follow-up recommendations per condition.
//!
//! Static reference data used by the Format stage. Recommendations are listed
//! in rank order; priority 1 is the most urgent.

use crate::models::analysis::{Condition, Recommendation, Severity};

/// Diagnosis sentence shown for a condition.
pub fn diagnosis_text(condition: Condition) -> &'static str {
    match condition {
        Condition::Cataract => {
            "Cataract detected. This is characterized by clouding of the eye's lens, \
             which can blur vision and increase glare sensitivity."
        }
        Condition::Healthy => {
            "Healthy eye. No significant issues detected in the submitted scan."
        }
        Condition::Pterygium => {
            "Pterygium detected. A fleshy growth of conjunctival tissue is extending \
             onto the cornea."
        }
        Condition::Glaucoma => {
            "Signs consistent with glaucoma. Damage to the optic nerve is often linked \
             to elevated intraocular pressure and can cause gradual vision loss."
        }
        Condition::Keratoconus => {
            "Signs consistent with keratoconus. The cornea appears to be thinning and \
             bulging into a cone shape."
        }
        Condition::Strabismus => {
            "Strabismus detected. The eyes do not appear to be aligned with each other."
        }
        Condition::PinkEye => {
            "Conjunctivitis (pink eye) detected. The conjunctiva shows redness and \
             inflammation."
        }
        Condition::Stye => {
            "Stye detected. A painful, red lump near the edge of the eyelid suggests a \
             blocked or infected gland."
        }
        Condition::Trachoma => {
            "Signs consistent with trachoma. This bacterial infection roughens the inner \
             eyelid and can scar the cornea if untreated."
        }
        Condition::Uveitis => {
            "Signs consistent with uveitis. Inflammation of the middle layer of the eye \
             can cause redness, pain, and light sensitivity."
        }
    }
}

const CATARACT: &[&str] = &[
    "Schedule an appointment with an ophthalmologist",
    "Avoid driving at night",
    "Use brighter lighting for reading and close work",
    "Wear sunglasses with UV protection outdoors",
];

const HEALTHY: &[&str] = &[
    "Continue routine eye examinations every one to two years",
    "Wear sunglasses with UV protection outdoors",
];

const PTERYGIUM: &[&str] = &[
    "Schedule an appointment with an ophthalmologist",
    "Use lubricating eye drops to reduce irritation",
    "Wear sunglasses with UV protection outdoors",
];

const GLAUCOMA: &[&str] = &[
    "Seek an eye pressure test with an ophthalmologist promptly",
    "Report any loss of peripheral vision immediately",
    "Do not stop prescribed eye drops without medical advice",
];

const KERATOCONUS: &[&str] = &[
    "Schedule a corneal topography exam with an ophthalmologist",
    "Avoid rubbing your eyes",
    "Ask about specialty contact lenses or corneal cross-linking",
];

const STRABISMUS: &[&str] = &[
    "Schedule an appointment with an ophthalmologist or orthoptist",
    "Note when eye misalignment or double vision occurs",
];

const PINK_EYE: &[&str] = &[
    "Consult a doctor if symptoms persist beyond a few days",
    "Wash hands frequently and avoid touching your eyes",
    "Do not share towels, pillows, or eye makeup",
    "Stop wearing contact lenses until symptoms clear",
];

const STYE: &[&str] = &[
    "Apply a warm compress for 10 to 15 minutes several times a day",
    "Do not squeeze or pop the stye",
    "See a doctor if swelling spreads or does not improve within a week",
];

const TRACHOMA: &[&str] = &[
    "Seek medical treatment promptly; antibiotics are effective early",
    "Wash your face and hands frequently",
    "Avoid sharing towels and washcloths",
];

const UVEITIS: &[&str] = &[
    "Seek urgent care from an ophthalmologist",
    "Wear dark glasses to reduce light sensitivity",
    "Report any sudden change in vision immediately",
];

fn entries(condition: Condition) -> &'static [&'static str] {
    match condition {
        Condition::Cataract => CATARACT,
        Condition::Healthy => HEALTHY,
        Condition::Pterygium => PTERYGIUM,
        Condition::Glaucoma => GLAUCOMA,
        Condition::Keratoconus => KERATOCONUS,
        Condition::Strabismus => STRABISMUS,
        Condition::PinkEye => PINK_EYE,
        Condition::Stye => STYE,
        Condition::Trachoma => TRACHOMA,
        Condition::Uveitis => UVEITIS,
    }
}

/// Ordered recommendations for a condition.
pub fn recommendations(condition: Condition) -> Vec<Recommendation> {
    entries(condition)
        .iter()
        .zip(1..)
        .map(|(text, priority)| Recommendation {
            text: (*text).to_string(),
            priority,
        })
        .collect()
}

/// Extra first-ranked entry for high-severity findings.
pub fn severity_escalation(severity: Severity) -> Option<&'static str> {
    match severity {
        Severity::High => Some("High-confidence finding: arrange a specialist visit as soon as possible"),
        _ => None,
    }
}
