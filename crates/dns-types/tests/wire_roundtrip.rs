//! End-to-end checks that arbitrary messages and zone data survive a
//! serialise/deserialise round trip unchanged.

use arbitrary::{Arbitrary, Unstructured};
use rand::RngCore;

use dns_types::protocol::types::Message;
use dns_types::zones::types::Zone;

fn arbitrary<'a, T: Arbitrary<'a>>(buf: &'a [u8]) -> Option<T> {
    T::arbitrary(&mut Unstructured::new(buf)).ok()
}

#[test]
fn roundtrip_message() {
    let mut rng = rand::thread_rng();
    let mut attempts = 0;
    let mut checked = 0;

    while checked < 50 && attempts < 500 {
        attempts += 1;
        let mut buf = vec![0u8; 2048];
        rng.fill_bytes(&mut buf);

        let Some(message): Option<Message> = arbitrary(&buf) else {
            continue;
        };
        checked += 1;

        let serialised = message.clone().to_octets().expect("message should serialise");
        let deserialised = Message::from_octets(&serialised);
        assert_eq!(Ok(message), deserialised);
    }

    assert!(checked > 0, "never generated a usable arbitrary Message");
}

#[test]
fn roundtrip_zone() {
    let mut rng = rand::thread_rng();
    let mut attempts = 0;
    let mut checked = 0;

    while checked < 20 && attempts < 500 {
        attempts += 1;
        let mut buf = vec![0u8; 4096];
        rng.fill_bytes(&mut buf);

        let Some(zone): Option<Zone> = arbitrary(&buf) else {
            continue;
        };
        checked += 1;

        let serialised = zone.serialise();
        let deserialised = Zone::deserialise(&serialised)
            .unwrap_or_else(|error| panic!("serialised zone failed to parse back: {error}\n{serialised}"));
        assert_eq!(zone, deserialised);
    }

    assert!(checked > 0, "never generated a usable arbitrary Zone");
}
