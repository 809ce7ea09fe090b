use state_machines::state_machine;

state_machine! {
    name: JobMachine,
    state: JobPhase,
    initial: Accepted,
    states: [Accepted, Fetching, Enhancing, Vectorizing, Publishing, Done, Failed],
    events {
        start_fetch { transition: { from: Accepted, to: Fetching } }
        start_enhance { transition: { from: Fetching, to: Enhancing } }
        start_vectorize { transition: { from: Enhancing, to: Vectorizing } }
        start_publish { transition: { from: Vectorizing, to: Publishing } }
        finish { transition: { from: Publishing, to: Done } }
        fail {
            transition: { from: Accepted, to: Failed }
            transition: { from: Fetching, to: Failed }
            transition: { from: Enhancing, to: Failed }
            transition: { from: Vectorizing, to: Failed }
            transition: { from: Publishing, to: Failed }
        }
    }
}

pub fn accepted() -> JobMachine<(), Accepted> {
    JobMachine::new(())
}
