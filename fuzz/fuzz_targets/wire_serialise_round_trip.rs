#![no_main]
use libfuzzer_sys::fuzz_target;

use mdns_types::protocol::serialise::Error;
use mdns_types::protocol::types::Message;

fuzz_target!(|message: Message| {
    match message.to_octets() {
        Ok(serialised) => {
            let deserialised = Message::from_octets(&serialised);
            assert_eq!(Ok(message), deserialised);
        }
        // arbitrary messages can exceed the packet size limit
        Err(Error::Oversize { .. }) => {}
        Err(error) => panic!("{error}"),
    }
});
