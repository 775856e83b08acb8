use placecard_core::models::{
    apply, diff, AssetRef, Category, CompanyRecord, FieldKind, MapLink, MessagingHandle,
    PhoneNumber, RecordId, WeeklySchedule,
};
use placecard_core::validate::{validate, ReasonCode, ValidationRules};
use proptest::prelude::*;

const SCHEDULES: [&str; 4] = [
    "Mon-Fri 09:00-18:00",
    "Mon-Fri 09:00-18:00; Sat 10:00-14:00, 15:00-20:00; Sun closed",
    "daily 00:00-24:00",
    "Tue 07:30-11:00; Fri-Sun 17:00-23:30",
];

fn canonical<T>(value: Result<T, ReasonCode>) -> T {
    value.unwrap()
}

fn asset_ref() -> impl Strategy<Value = AssetRef> {
    ("[0-9a-f]{64}", prop::sample::select(vec!["png", "jpg", "webp"]))
        .prop_map(|(hash, ext)| canonical(AssetRef::from_canonical(format!("photos/{hash}.{ext}"))))
}

prop_compose! {
    fn company_record()(
        name in "[A-Z][a-z]{2,10}( [A-Z][a-z]{2,10})?",
        category in prop::option::of(prop::sample::select(Category::ALL.to_vec())),
        photos in prop::collection::vec(asset_ref(), 0..3),
        map_link in prop::option::of("[A-Za-z0-9]{4,10}"),
        phone in prop::option::of("[1-9][0-9]{7}"),
        messaging in prop::option::of("[a-z][a-z0-9_]{4,15}"),
        hours in prop::option::of(prop::sample::select(SCHEDULES.to_vec())),
    ) -> CompanyRecord {
        let mut record = CompanyRecord::new(RecordId::new("R7").unwrap(), name).unwrap();
        record.category = category;
        record.photos = photos;
        record.map_link = map_link
            .map(|slug| canonical(MapLink::from_canonical(format!("https://maps.app.goo.gl/{slug}"))));
        record.phone = phone.map(|digits| canonical(PhoneNumber::from_canonical(format!("+506{digits}"))));
        record.messaging =
            messaging.map(|name| canonical(MessagingHandle::from_canonical(format!("@{name}"))));
        record.hours = hours.map(|raw| canonical(WeeklySchedule::try_from(raw.to_string())));
        record
    }
}

/// Open/close pairs in minutes after midnight, closing at `24:00` at most.
fn intervals() -> impl Strategy<Value = Vec<(u16, u16)>> {
    prop::collection::vec((0u16..1440, 0u16..=1440), 1..5)
}

fn clock(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn monday(intervals: &[(u16, u16)]) -> String {
    let rendered: Vec<String> = intervals
        .iter()
        .map(|(open, close)| format!("{}-{}", clock(*open), clock(*close)))
        .collect();
    format!("Mon {}", rendered.join(", "))
}

fn overlapping(intervals: &[(u16, u16)]) -> bool {
    intervals.iter().enumerate().any(|(i, a)| {
        intervals[i + 1..]
            .iter()
            .any(|b| a.0 < b.1 && b.0 < a.1)
    })
}

proptest! {
    #[test]
    fn prop_apply_of_diff_reaches_target(a in company_record(), b in company_record()) {
        let changes = diff(&a, &b);
        prop_assert_eq!(apply(&a, &changes).unwrap(), b.clone());
        prop_assert_eq!(changes.is_empty(), a == b);
    }

    #[test]
    fn prop_diff_touches_only_differing_fields(a in company_record(), b in company_record()) {
        let changes = diff(&a, &b);
        for kind in FieldKind::ALL {
            prop_assert_eq!(changes.contains(kind), a.get(kind) != b.get(kind));
        }
    }

    #[test]
    fn prop_hours_accepted_iff_ordered_and_disjoint(intervals in intervals()) {
        let raw = monday(&intervals);
        let result = validate(FieldKind::Hours, &raw, &ValidationRules::default());

        let inverted = intervals.iter().any(|(open, close)| close <= open);
        if inverted {
            prop_assert_eq!(result.unwrap_err().reason, ReasonCode::CloseBeforeOpen);
        } else if overlapping(&intervals) {
            prop_assert_eq!(result.unwrap_err().reason, ReasonCode::OverlappingHours);
        } else {
            prop_assert!(result.is_ok(), "{} rejected", raw);
        }
    }

    #[test]
    fn prop_accepted_hours_reparse_to_same_schedule(intervals in intervals()) {
        let Ok(schedule) = WeeklySchedule::try_from(monday(&intervals)) else {
            return Ok(());
        };
        prop_assert_eq!(WeeklySchedule::try_from(schedule.to_string()).unwrap(), schedule);
    }
}
