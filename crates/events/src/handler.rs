/// Execute an aggregate command in place: decide, then fold the decided events.
///
/// Returns the decided events. No persistence, no publication; used by tests and
/// by callers that only need the resulting in-memory state.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: stockledger_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
